use anchor_lang::prelude::*;
use anchor_lang::solana_program::program::invoke;
use anchor_lang::solana_program::system_instruction;
use anchor_lang::solana_program::sysvar::slot_hashes;
use anchor_spl::token::{self, Mint, MintTo, Token, TokenAccount};

declare_id!("6aRnD2n9QMhjdQN6pt9rNZyZyxBcYtRSfuEsXj7RbnZu");


#[cfg(not(feature = "no-entrypoint"))]
use solana_security_txt::security_txt;

#[cfg(not(feature = "no-entrypoint"))]
security_txt! {
    name: "Hot Potato",
    project_url: "https://github.com/hot-potato-game/hot-potato",
    contacts: "email:security@hot-potato.game",
    policy: "https://github.com/hot-potato-game/hot-potato/blob/main/SECURITY.md",
    preferred_languages: "en",
    source_code: "https://github.com/hot-potato-game/hot-potato",
    auditors: "Unaudited: toss outcomes drawn from SlotHashes commit-reveal"
}

// ── Seeds ─────────────────────────────────────────────────────────────────
pub const GAME_SEED:        &[u8] = b"game";
pub const ROUND_SEED:       &[u8] = b"round";
pub const LEDGER_SEED:      &[u8] = b"ledger";
pub const REWARD_MINT_SEED: &[u8] = b"reward_mint";

// ── Constants ─────────────────────────────────────────────────────────────
pub const FIRST_ROUND:          u64 = 1;
pub const REWARD_DECIMALS:      u8  = 6;
pub const AUTH_TIMELOCK:        i64 = 259_200;  // 72h anti-rug (authority transfer)
pub const MIN_RESOLVE_DELAY:    u64 = 2;        // commit slot + 1 must be final before resolving
pub const SLOT_HASHES_WINDOW:   u64 = 512;      // entries retained by the SlotHashes sysvar
pub const DEFAULT_RESOLVE_TIMEOUT: u64 = 256;   // slots until a pending toss force-explodes
pub const MAX_RISK_TIERS:       usize = 8;
pub const MAX_YIELD_RATE:       u64 = 5_000_000_000; // per second; 117 years of hold time before u64 overflow

// ── Default risk profile ──────────────────────────────────────────────────
//   held ≥ 1h  →  5%   |  held ≥ 6h  → 30%   |  held ≥ 24h → 60%
pub const DEFAULT_HOLD_TIME_TIERS: [u64; 3] = [3_600, 21_600, 86_400];
pub const DEFAULT_RISK_TIERS:      [u8; 3]  = [5, 30, 60];

#[program]
pub mod hot_potato {
    use super::*;

    // ── Initialize: game PDA, reward mint, round #1 ─────────────────
    pub fn initialize(
        ctx: Context<Initialize>,
        first_holder: Pubkey,
        entry_fee:    u64,
        yield_rate:   u64,
    ) -> Result<()> {
        let clock = Clock::get()?;
        let game_key = ctx.accounts.game.key();

        let game = &mut ctx.accounts.game;
        game.authority             = ctx.accounts.authority.key();
        game.pending_authority     = None;
        game.authority_transfer_at = 0;
        game.reward_mint           = ctx.accounts.reward_mint.key();
        game.entry_fee             = entry_fee;
        game.set_yield_rate(yield_rate)?;
        game.resolve_timeout_slots = DEFAULT_RESOLVE_TIMEOUT;
        game.claim_payout_policy   = ClaimPayoutPolicy::Revert;
        game.risk_profile          = RiskProfile::default_tiers();
        game.bump                  = ctx.bumps.game;
        game.begin_round(FIRST_ROUND, first_holder, clock.unix_timestamp)?;

        ctx.accounts.round.open(game_key, FIRST_ROUND, clock.unix_timestamp, ctx.bumps.round);

        msg!("Round {} started, potato held by {}", FIRST_ROUND, first_holder);
        emit!(RoundStarted { round: FIRST_ROUND, holder: first_holder, started_at: clock.unix_timestamp });
        Ok(())
    }

    // ── Toss: holder nominates the next receiver and pays the fee ──
    pub fn toss(ctx: Context<Toss>, to: Pubkey, fee: u64) -> Result<()> {
        let clock = Clock::get()?;
        let holder_key = ctx.accounts.holder.key();
        let holder_ai = ctx.accounts.holder.to_account_info();

        let game = &mut ctx.accounts.game;
        lock_game(game)?;
        game.begin_toss(holder_key, to, fee, clock.slot)?;

        if fee > 0 {
            let ix = system_instruction::transfer(&holder_key, &game.key(), fee);
            invoke(&ix, &[holder_ai, game.to_account_info()])?;
        }
        let rent = vault_rent(game)?;
        check_solvency(game, rent)?;

        game.release_lock();
        emit!(PotatoTossed {
            round: game.round, from: holder_key, to,
            fee, toss_slot: game.toss_slot,
        });
        Ok(())
    }

    // ── Resolve (permissionless settlement of a pending toss) ───────
    // Anyone may crank this once the commitment slot is final. Past the
    // timeout the slot hash is no longer retrievable and the potato explodes.
    pub fn resolve(ctx: Context<Resolve>) -> Result<()> {
        let clock = Clock::get()?;
        let round_key = ctx.accounts.round.key();

        lock_game(&mut ctx.accounts.game)?;
        ctx.accounts.game.check_resolvable(clock.slot)?;

        let commitment = if ctx.accounts.game.is_timed_out(clock.slot) {
            None
        } else {
            find_commitment_hash(&ctx.accounts.slot_hashes.try_borrow_data()?, ctx.accounts.game.toss_slot)
        };
        let outcome = ctx.accounts.game.resolution(clock.unix_timestamp, clock.slot, commitment.as_ref())?;
        let reward = ctx.accounts.game.reward_for(&outcome, ctx.accounts.holder_reward_account.is_some())?;

        let holder   = ctx.accounts.game.holder;
        let receiver = ctx.accounts.game.pending_receiver;
        ctx.accounts.holder_ledger.bind(round_key, holder, ctx.bumps.holder_ledger);

        if outcome.exploded {
            if outcome.forced {
                msg!(
                    "Resolution forced at slot {} (toss slot {}, timeout {})",
                    clock.slot, ctx.accounts.game.toss_slot, ctx.accounts.game.resolve_timeout_slots
                );
            }
            let game   = &mut ctx.accounts.game;
            let round  = &mut ctx.accounts.round;
            let ledger = &mut ctx.accounts.holder_ledger;
            let jackpot = game.explode(round, ledger, outcome.hold_time)?;

            emit!(PotatoExploded {
                round: round.index, holder, hold_time: outcome.hold_time,
                risk: outcome.risk, draw: outcome.draw, forced: outcome.forced,
            });
            emit!(ClaimingOpened {
                round: round.index, final_jackpot: jackpot,
                total_hold_time: round.total_hold_time,
            });
        } else {
            if let Some(holder_tokens) = ctx.accounts.holder_reward_account.as_ref().filter(|_| reward > 0) {
                mint_yield(
                    &ctx.accounts.game,
                    &ctx.accounts.reward_mint,
                    holder_tokens,
                    &ctx.accounts.token_program,
                    reward,
                )?;
                emit!(YieldCredited { round: ctx.accounts.game.round, holder, hold_time: outcome.hold_time, amount: reward });
            }

            let game   = &mut ctx.accounts.game;
            let round  = &mut ctx.accounts.round;
            let ledger = &mut ctx.accounts.holder_ledger;
            game.land(round, ledger, outcome.hold_time, clock.unix_timestamp, reward)?;

            emit!(PotatoLanded {
                round: round.index, from: holder, to: receiver,
                hold_time: outcome.hold_time, risk: outcome.risk, draw: outcome.draw.unwrap_or_default(),
            });
        }

        check_solvency(&ctx.accounts.game, vault_rent(&ctx.accounts.game)?)?;
        ctx.accounts.game.release_lock();
        Ok(())
    }

    // ── Claim jackpot share (one claim per address per round) ───────
    pub fn claim_jackpot_share(ctx: Context<ClaimJackpotShare>, round_index: u64) -> Result<()> {
        let round_key = ctx.accounts.round.key();
        let claimant_key = ctx.accounts.claimant.key();
        let claimant_ai = ctx.accounts.claimant.to_account_info();
        let rent = vault_rent(&ctx.accounts.game)?;

        let game        = &mut ctx.accounts.game;
        let round       = &mut ctx.accounts.round;
        let participant = &mut ctx.accounts.participant;

        game.acquire_lock()?;
        participant.bind(round_key, claimant_key, ctx.bumps.participant);

        match process_claim(game, round, participant, &claimant_ai, rent)? {
            ClaimSettlement::Paid(amount) => emit!(JackpotShareClaimed {
                round: round_index, claimant: claimant_key,
                hold_time: participant.hold_time, amount,
            }),
            ClaimSettlement::Forfeited(amount) => {
                msg!("Payout of {} lamports to {} failed; share forfeited", amount, claimant_key);
                emit!(JackpotPayoutFailed { round: round_index, claimant: claimant_key, amount });
            }
        }

        game.release_lock();
        Ok(())
    }

    // ── Admin: Start next round (only after the potato exploded) ────
    pub fn start_round(ctx: Context<StartRound>, round_index: u64, first_holder: Pubkey) -> Result<()> {
        let clock = Clock::get()?;
        let game_key = ctx.accounts.game.key();

        let game = &mut ctx.accounts.game;
        game.acquire_lock()?;
        require!(game.state == GameState::GameOver,     PotatoError::RoundStillActive);
        require!(round_index == game.round.wrapping_add(1), PotatoError::RoundMismatch);
        game.begin_round(round_index, first_holder, clock.unix_timestamp)?;
        game.release_lock();

        ctx.accounts.round.open(game_key, round_index, clock.unix_timestamp, ctx.bumps.round);

        msg!("Round {} started, potato held by {}", round_index, first_holder);
        emit!(RoundStarted { round: round_index, holder: first_holder, started_at: clock.unix_timestamp });
        Ok(())
    }

    // ── Admin: Risk profile ───────────────────────────────────────
    pub fn set_risk_profile(
        ctx: Context<AdminOnly>,
        thresholds:  Vec<u64>,
        percentages: Vec<u8>,
    ) -> Result<()> {
        let game = &mut ctx.accounts.game;
        game.acquire_lock()?;
        game.set_risk_profile(RiskProfile::new(&thresholds, &percentages)?)?;
        game.release_lock();
        emit!(RiskProfileUpdated { thresholds, percentages });
        Ok(())
    }

    // ── Admin: Entry fee ──────────────────────────────────────────
    pub fn set_entry_fee(ctx: Context<AdminOnly>, entry_fee: u64) -> Result<()> {
        let game = &mut ctx.accounts.game;
        game.acquire_lock()?;
        let old = game.set_entry_fee(entry_fee);
        game.release_lock();
        emit!(EntryFeeUpdated { old_fee: old, new_fee: entry_fee });
        Ok(())
    }

    // ── Admin: Yield rate (prospective only) ──────────────────────
    pub fn set_yield_rate(ctx: Context<AdminOnly>, yield_rate: u64) -> Result<()> {
        let game = &mut ctx.accounts.game;
        game.acquire_lock()?;
        let old = game.yield_rate;
        game.set_yield_rate(yield_rate)?;
        game.release_lock();
        emit!(YieldRateUpdated { old_rate: old, new_rate: yield_rate });
        Ok(())
    }

    // ── Admin: Forced-resolution timeout ──────────────────────────
    pub fn set_resolve_timeout(ctx: Context<AdminOnly>, timeout_slots: u64) -> Result<()> {
        let game = &mut ctx.accounts.game;
        game.acquire_lock()?;
        game.set_resolve_timeout(timeout_slots)?;
        game.release_lock();
        emit!(ResolveTimeoutUpdated { timeout_slots });
        Ok(())
    }

    // ── Admin: What a failed claim payout does to the claimed flag ──
    pub fn set_claim_payout_policy(ctx: Context<AdminOnly>, policy: ClaimPayoutPolicy) -> Result<()> {
        let game = &mut ctx.accounts.game;
        game.acquire_lock()?;
        game.claim_payout_policy = policy;
        game.release_lock();
        emit!(ClaimPayoutPolicyUpdated { policy });
        Ok(())
    }

    // ── Authority Transfer (with 72h timelock) ─────────────────

    pub fn propose_authority_transfer(ctx: Context<AdminOnly>, new_authority: Pubkey) -> Result<()> {
        let now = Clock::get()?.unix_timestamp;
        let game = &mut ctx.accounts.game;
        game.acquire_lock()?;
        game.propose_authority(new_authority, now)?;
        game.release_lock();

        emit!(AuthorityTransferProposed {
            current: game.authority,
            proposed: new_authority,
            unlocks_at: game.authority_transfer_at,
        });
        Ok(())
    }

    pub fn cancel_authority_transfer(ctx: Context<AdminOnly>) -> Result<()> {
        let game = &mut ctx.accounts.game;
        game.acquire_lock()?;
        require!(game.pending_authority.is_some(), PotatoError::NoPendingAuthority);

        game.pending_authority = None;
        game.authority_transfer_at = 0;
        game.release_lock();

        emit!(AuthorityTransferCancelled { authority: game.authority });
        Ok(())
    }

    pub fn execute_authority_transfer(ctx: Context<ExecuteAuthorityTransfer>) -> Result<()> {
        let now = Clock::get()?.unix_timestamp;
        let game = &mut ctx.accounts.game;
        let old = game.authority;
        game.acquire_lock()?;
        game.accept_authority(ctx.accounts.new_authority.key(), now)?;
        game.release_lock();

        emit!(AuthorityTransferred { old_authority: old, new_authority: game.authority });
        Ok(())
    }

    // ── Views ─────────────────────────────────────────────────────
    pub fn calculate_risk(ctx: Context<ViewGame>, hold_time: u64) -> Result<u8> {
        Ok(ctx.accounts.game.risk_profile.risk_for(hold_time))
    }

    pub fn calculate_pending_yield(ctx: Context<ViewGame>) -> Result<u64> {
        let now = Clock::get()?.unix_timestamp;
        Ok(ctx.accounts.game.pending_yield(now))
    }
}

// ══════════════════════════════════════════════════════════════════════════
//  HELPERS
// ══════════════════════════════════════════════════════════════════════════

/// Take the reentrancy lock and write it through to account data. Anchor
/// only serializes `Account<Game>` at exit, so without the write a CPI that
/// called back into this program would read `locked = false`.
fn lock_game(game: &mut Account<Game>) -> Result<()> {
    game.acquire_lock()?;
    game.exit(&crate::ID)
}

fn vault_rent(game: &Account<Game>) -> Result<u64> {
    Ok(Rent::get()?.minimum_balance(game.to_account_info().data_len()))
}

/// The game PDA doubles as the jackpot vault. Its lamports above rent must
/// always cover the live pot plus every snapshotted-but-unpaid jackpot.
fn check_solvency(game: &Account<Game>, rent: u64) -> Result<()> {
    let physical = game.to_account_info().lamports().saturating_sub(rent);
    let reserved = game.pot.saturating_add(game.outstanding_jackpot);
    require!(physical >= reserved, PotatoError::AccountingBroken);
    Ok(())
}

/// Move lamports out of the program-owned vault without dipping below rent.
/// Both balances are borrowed before either is touched so a failure leaves
/// nothing half-moved.
fn pay_out(from: &AccountInfo, to: &AccountInfo, amount: u64, rent: u64) -> Result<()> {
    require!(from.lamports().saturating_sub(rent) >= amount, PotatoError::PayoutFailed);

    let mut from_lamports = from.try_borrow_mut_lamports().map_err(|_| PotatoError::PayoutFailed)?;
    let mut to_lamports   = to.try_borrow_mut_lamports().map_err(|_| PotatoError::PayoutFailed)?;
    let credited = (**to_lamports).checked_add(amount).ok_or(PotatoError::PayoutFailed)?;
    **from_lamports -= amount;
    **to_lamports = credited;
    Ok(())
}

/// Claim-then-pay: the claimed flag is set before lamports leave the vault,
/// and `claim_payout_policy` decides what a failed payout does to it.
fn process_claim(
    game:        &mut Account<Game>,
    round:       &mut Round,
    participant: &mut Participant,
    claimant:    &AccountInfo,
    rent:        u64,
) -> Result<ClaimSettlement> {
    let share = round.claim_share(participant)?;

    let payout = pay_out(&game.to_account_info(), claimant, share, rent);
    let settlement = game.settle_claim(round, share, payout)?;

    check_solvency(game, rent)?;
    Ok(settlement)
}

/// Mint reward tokens to the outgoing holder. The game PDA is the mint
/// authority, so only this program can sign for it.
fn mint_yield<'info>(
    game:          &Account<'info, Game>,
    reward_mint:   &Account<'info, Mint>,
    holder_tokens: &Account<'info, TokenAccount>,
    token_program: &Program<'info, Token>,
    amount:        u64,
) -> Result<()> {
    let bump = [game.bump];
    let signer_seeds: &[&[u8]] = &[GAME_SEED, &bump];
    token::mint_to(
        CpiContext::new_with_signer(
            token_program.to_account_info(),
            MintTo {
                mint:      reward_mint.to_account_info(),
                to:        holder_tokens.to_account_info(),
                authority: game.to_account_info(),
            },
            &[signer_seeds],
        ),
        amount,
    )
}

/// Locate the commitment for a toss made at `commit_slot`: the hash of the
/// first recorded slot after it. SlotHashes is `len: u64` followed by
/// `(slot: u64, hash: [u8; 32])` entries, newest first. Skipped slots have no
/// entry, so the commitment is not necessarily `commit_slot + 1`.
///
/// Returns `None` unless the retained window reaches back to `commit_slot`;
/// otherwise the oldest visible entry could be a later slot than the real
/// commitment.
pub fn find_commitment_hash(data: &[u8], commit_slot: u64) -> Option<[u8; 32]> {
    let n = u64::from_le_bytes(data.get(0..8)?.try_into().ok()?) as usize;

    let mut candidate = None;
    for i in 0..n.min(SLOT_HASHES_WINDOW as usize) {
        let off = 8 + i * 40;
        let entry = data.get(off..off + 40)?;
        let slot = u64::from_le_bytes(entry[0..8].try_into().ok()?);
        if slot <= commit_slot {
            return candidate;
        }
        candidate = Some(entry[8..40].try_into().ok()?);
    }
    None
}

/// Blake3( slot_hash || holder || receiver ) folded to a percentile.
/// Mixing both parties in keeps one slot hash from deciding every pair alike.
pub fn derive_draw(slot_hash: &[u8; 32], holder: &Pubkey, receiver: &Pubkey) -> u8 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(slot_hash);
    hasher.update(holder.as_ref());
    hasher.update(receiver.as_ref());
    let digest = hasher.finalize();

    let mut word = [0u8; 8];
    word.copy_from_slice(&digest.as_bytes()[..8]);
    (u64::from_le_bytes(word) % 100) as u8
}

/// `final_jackpot * hold_time / total_hold_time`, truncated.
pub fn jackpot_share(final_jackpot: u64, hold_time: u64, total_hold_time: u64) -> Result<u64> {
    if total_hold_time == 0 {
        return Ok(0);
    }
    let share = (final_jackpot as u128)
        .checked_mul(hold_time as u128)
        .ok_or(PotatoError::MathOverflow)?
        / total_hold_time as u128;
    u64::try_from(share).map_err(|_| PotatoError::MathOverflow.into())
}

/// Credit one stint of possession to both the holder's ledger entry and the
/// round total, keeping the total equal to the sum of entries.
fn credit_hold_time(round: &mut Round, ledger: &mut Participant, hold_time: u64) -> Result<()> {
    ledger.hold_time = ledger.hold_time.checked_add(hold_time).ok_or(PotatoError::MathOverflow)?;
    round.total_hold_time = round.total_hold_time.checked_add(hold_time).ok_or(PotatoError::MathOverflow)?;
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════
//  ACCOUNTS
// ══════════════════════════════════════════════════════════════════════════

#[derive(Accounts)]
pub struct Initialize<'info> {
    #[account(init, payer = authority, space = 8 + Game::LEN,
              seeds = [GAME_SEED], bump)]
    pub game: Box<Account<'info, Game>>,
    #[account(init, payer = authority,
              seeds = [REWARD_MINT_SEED, game.key().as_ref()], bump,
              mint::decimals = REWARD_DECIMALS, mint::authority = game)]
    pub reward_mint: Account<'info, Mint>,
    #[account(init, payer = authority, space = 8 + Round::LEN,
              seeds = [ROUND_SEED, game.key().as_ref(), FIRST_ROUND.to_le_bytes().as_ref()], bump)]
    pub round: Account<'info, Round>,
    #[account(mut)] pub authority: Signer<'info>,
    pub token_program: Program<'info, Token>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct Toss<'info> {
    #[account(mut)] pub holder: Signer<'info>,
    #[account(mut, seeds = [GAME_SEED], bump = game.bump)]
    pub game: Box<Account<'info, Game>>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct Resolve<'info> {
    /// Permissionless: anyone can settle. Pays rent for a first-time ledger entry.
    #[account(mut)] pub caller: Signer<'info>,
    #[account(mut, seeds = [GAME_SEED], bump = game.bump)]
    pub game: Box<Account<'info, Game>>,
    #[account(mut, seeds = [ROUND_SEED, game.key().as_ref(), game.round.to_le_bytes().as_ref()],
              bump = round.bump)]
    pub round: Account<'info, Round>,
    #[account(init_if_needed, payer = caller, space = 8 + Participant::LEN,
              seeds = [LEDGER_SEED, round.key().as_ref(), game.holder.as_ref()], bump)]
    pub holder_ledger: Account<'info, Participant>,
    /// CHECK: only the yield token account authority; pinned to the current holder
    #[account(address = game.holder)]
    pub holder: UncheckedAccount<'info>,
    #[account(mut, address = game.reward_mint)]
    pub reward_mint: Box<Account<'info, Mint>>,
    /// Required only when the landing mints yield.
    #[account(mut, token::mint = reward_mint, token::authority = holder)]
    pub holder_reward_account: Option<Box<Account<'info, TokenAccount>>>,
    /// CHECK: address validated, not injectable
    #[account(address = slot_hashes::ID)]
    pub slot_hashes: UncheckedAccount<'info>,
    pub token_program: Program<'info, Token>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
#[instruction(round_index: u64)]
pub struct ClaimJackpotShare<'info> {
    #[account(mut)] pub claimant: Signer<'info>,
    #[account(mut, seeds = [GAME_SEED], bump = game.bump)]
    pub game: Box<Account<'info, Game>>,
    #[account(mut, seeds = [ROUND_SEED, game.key().as_ref(), round_index.to_le_bytes().as_ref()],
              bump = round.bump)]
    pub round: Account<'info, Round>,
    #[account(init_if_needed, payer = claimant, space = 8 + Participant::LEN,
              seeds = [LEDGER_SEED, round.key().as_ref(), claimant.key().as_ref()], bump)]
    pub participant: Account<'info, Participant>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
#[instruction(round_index: u64)]
pub struct StartRound<'info> {
    #[account(mut, seeds = [GAME_SEED], bump = game.bump,
              has_one = authority @ PotatoError::NotAuthority)]
    pub game: Box<Account<'info, Game>>,
    #[account(init, payer = authority, space = 8 + Round::LEN,
              seeds = [ROUND_SEED, game.key().as_ref(), round_index.to_le_bytes().as_ref()], bump)]
    pub round: Account<'info, Round>,
    #[account(mut)] pub authority: Signer<'info>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct AdminOnly<'info> {
    #[account(mut, seeds = [GAME_SEED], bump = game.bump,
              has_one = authority @ PotatoError::NotAuthority)]
    pub game: Box<Account<'info, Game>>,
    #[account(mut)] pub authority: Signer<'info>,
}

#[derive(Accounts)]
pub struct ExecuteAuthorityTransfer<'info> {
    #[account(mut, seeds = [GAME_SEED], bump = game.bump)]
    pub game: Box<Account<'info, Game>>,
    /// The new authority must sign to accept the transfer
    #[account(mut)] pub new_authority: Signer<'info>,
}

#[derive(Accounts)]
pub struct ViewGame<'info> {
    #[account(seeds = [GAME_SEED], bump = game.bump)]
    pub game: Box<Account<'info, Game>>,
}

// ══════════════════════════════════════════════════════════════════════════
//  STATE
// ══════════════════════════════════════════════════════════════════════════

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum GameState {
    /// No hand-off pending; the holder may toss.
    #[default]
    Idle,
    /// Hand-off pending resolution.
    InFlight,
    /// Potato destroyed this round; claiming is open.
    GameOver,
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ClaimPayoutPolicy {
    /// A failed payout aborts the claim and the claimed flag goes with it.
    #[default]
    Revert,
    /// The claimed flag survives a failed payout and the share is forfeited.
    Forfeit,
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RiskProfile {
    pub len:                   u8,                      // 1
    pub hold_time_tiers:       [u64; MAX_RISK_TIERS],   // 64
    pub risk_percentage_tiers: [u8; MAX_RISK_TIERS],    // 8
}

impl RiskProfile {
    pub const LEN: usize = 1 + 8 * MAX_RISK_TIERS + MAX_RISK_TIERS;

    pub fn new(thresholds: &[u64], percentages: &[u8]) -> Result<Self> {
        require!(thresholds.len() == percentages.len(), PotatoError::RiskProfileLengthMismatch);
        require!(thresholds.len() <= MAX_RISK_TIERS,     PotatoError::TooManyRiskTiers);
        require!(percentages.iter().all(|p| *p <= 100),  PotatoError::RiskPercentageTooHigh);
        require!(
            thresholds.windows(2).all(|w| w[0] < w[1]) && percentages.windows(2).all(|w| w[0] <= w[1]),
            PotatoError::RiskTiersNotMonotonic
        );

        let mut profile = Self { len: thresholds.len() as u8, ..Self::default() };
        profile.hold_time_tiers[..thresholds.len()].copy_from_slice(thresholds);
        profile.risk_percentage_tiers[..percentages.len()].copy_from_slice(percentages);
        Ok(profile)
    }

    pub fn default_tiers() -> Self {
        let mut profile = Self { len: DEFAULT_HOLD_TIME_TIERS.len() as u8, ..Self::default() };
        profile.hold_time_tiers[..DEFAULT_HOLD_TIME_TIERS.len()].copy_from_slice(&DEFAULT_HOLD_TIME_TIERS);
        profile.risk_percentage_tiers[..DEFAULT_RISK_TIERS.len()].copy_from_slice(&DEFAULT_RISK_TIERS);
        profile
    }

    pub fn thresholds(&self) -> &[u64] {
        &self.hold_time_tiers[..self.tier_count()]
    }

    pub fn percentages(&self) -> &[u8] {
        &self.risk_percentage_tiers[..self.tier_count()]
    }

    fn tier_count(&self) -> usize {
        (self.len as usize).min(MAX_RISK_TIERS)
    }

    /// Percentage of the highest tier whose threshold the hold time reaches.
    pub fn risk_for(&self, hold_time: u64) -> u8 {
        self.thresholds()
            .iter()
            .zip(self.percentages())
            .rev()
            .find(|(threshold, _)| **threshold <= hold_time)
            .map_or(0, |(_, pct)| *pct)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimSettlement {
    Paid(u64),
    /// Payout failed under `ClaimPayoutPolicy::Forfeit`; the claimant stays claimed.
    Forfeited(u64),
}

/// Everything `resolve` decided, computed before any state is touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub hold_time: u64,
    pub risk:      u8,
    /// `None` when the timeout forced the outcome without a draw.
    pub draw:      Option<u8>,
    pub forced:    bool,
    pub exploded:  bool,
}

#[account]
#[derive(Default)]
pub struct Game {
    pub authority:              Pubkey,             // 32
    pub pending_authority:      Option<Pubkey>,     // 1 + 32 = 33
    pub authority_transfer_at:  i64,                // 8
    pub reward_mint:            Pubkey,             // 32
    pub round:                  u64,                // 8
    pub state:                  GameState,          // 1
    // ── Custody ──
    pub potato_alive:           bool,               // 1
    pub holder:                 Pubkey,             // 32
    pub last_transfer_time:     i64,                // 8
    pub toss_slot:              u64,                // 8
    pub pending_receiver:       Pubkey,             // 32
    // ── Configuration ──
    pub entry_fee:              u64,                // 8
    pub yield_rate:             u64,                // 8
    pub resolve_timeout_slots:  u64,                // 8
    pub claim_payout_policy:    ClaimPayoutPolicy,  // 1
    pub risk_profile:           RiskProfile,        // 73
    // ── Vault compartments ──
    pub pot:                    u64,                // 8: entry fees of the live round
    pub outstanding_jackpot:    u64,                // 8: snapshotted, not yet paid
    pub forfeited_jackpot:      u64,                // 8: failed payouts written off under Forfeit
    pub locked:                 bool,               // 1
    // ── Transparency counters ──
    pub total_tosses:           u64,                // 8
    pub total_landings:         u64,                // 8
    pub total_explosions:       u64,                // 8
    pub total_yield_minted:     u64,                // 8
    pub bump:                   u8,                 // 1
}

impl Game {
    pub const LEN: usize = 32 + 33 + 8 + 32 + 8 + 1
        + 1 + 32 + 8 + 8 + 32
        + 8 + 8 + 8 + 1 + RiskProfile::LEN
        + 8 + 8 + 8 + 1
        + 8 + 8 + 8 + 8 + 1;

    pub fn acquire_lock(&mut self) -> Result<()> {
        require!(!self.locked, PotatoError::ReentrancyDetected);
        self.locked = true;
        Ok(())
    }

    pub fn release_lock(&mut self) {
        self.locked = false;
    }

    /// Hand a fresh potato to `holder`. Refuses while one is still alive.
    pub fn begin_round(&mut self, index: u64, holder: Pubkey, now: i64) -> Result<()> {
        require!(!self.potato_alive, PotatoError::RoundStillActive);
        require_keys_neq!(holder, Pubkey::default(), PotatoError::InvalidRecipient);

        self.round              = index;
        self.state              = GameState::Idle;
        self.potato_alive       = true;
        self.holder             = holder;
        self.last_transfer_time = now;
        self.toss_slot          = 0;
        self.pending_receiver   = Pubkey::default();
        self.pot                = 0;
        Ok(())
    }

    pub fn begin_toss(&mut self, caller: Pubkey, to: Pubkey, fee: u64, slot: u64) -> Result<()> {
        require!(self.state == GameState::Idle, PotatoError::NotIdle);
        require_keys_eq!(caller, self.holder,   PotatoError::NotHolder);
        require!(to != Pubkey::default() && to != caller, PotatoError::InvalidRecipient);
        require!(fee == self.entry_fee,         PotatoError::WrongEntryFee);

        self.pot              = self.pot.checked_add(fee).ok_or(PotatoError::MathOverflow)?;
        self.state            = GameState::InFlight;
        self.toss_slot        = slot;
        self.pending_receiver = to;
        self.total_tosses     = self.total_tosses.wrapping_add(1);
        Ok(())
    }

    pub fn hold_time(&self, now: i64) -> u64 {
        now.saturating_sub(self.last_transfer_time).max(0) as u64
    }

    pub fn is_timed_out(&self, slot: u64) -> bool {
        slot >= self.toss_slot.saturating_add(self.resolve_timeout_slots)
    }

    pub fn check_resolvable(&self, slot: u64) -> Result<()> {
        require!(self.state == GameState::InFlight, PotatoError::NotInFlight);
        require!(slot >= self.toss_slot.saturating_add(MIN_RESOLVE_DELAY), PotatoError::ResolutionTooEarly);
        Ok(())
    }

    /// Decide a pending toss. `commitment` is only consulted before the timeout.
    pub fn resolution(&self, now: i64, slot: u64, commitment: Option<&[u8; 32]>) -> Result<Resolution> {
        self.check_resolvable(slot)?;

        let hold_time = self.hold_time(now);
        let risk = self.risk_profile.risk_for(hold_time);
        let forced = self.is_timed_out(slot);
        let draw = if forced {
            None
        } else {
            let hash = commitment.ok_or(PotatoError::SlotHashNotFound)?;
            Some(derive_draw(hash, &self.holder, &self.pending_receiver))
        };
        let exploded = forced || draw.is_some_and(|d| d < risk);

        Ok(Resolution { hold_time, risk, draw, forced, exploded })
    }

    pub fn yield_for(&self, hold_time: u64) -> Result<u64> {
        hold_time.checked_mul(self.yield_rate).ok_or(PotatoError::MathOverflow.into())
    }

    /// Yield to mint for a resolved toss; nothing on an explosion.
    pub fn reward_for(&self, outcome: &Resolution, has_reward_account: bool) -> Result<u64> {
        if outcome.exploded {
            return Ok(0);
        }
        let reward = self.yield_for(outcome.hold_time)?;
        require!(reward == 0 || has_reward_account, PotatoError::RewardAccountMissing);
        Ok(reward)
    }

    pub fn set_yield_rate(&mut self, yield_rate: u64) -> Result<()> {
        require!(yield_rate <= MAX_YIELD_RATE, PotatoError::YieldRateTooHigh);
        self.yield_rate = yield_rate;
        Ok(())
    }

    /// Yield the current holder would be credited if a toss landed now.
    pub fn pending_yield(&self, now: i64) -> u64 {
        if self.state != GameState::Idle || !self.potato_alive || self.holder == Pubkey::default() {
            return 0;
        }
        self.hold_time(now).saturating_mul(self.yield_rate)
    }

    /// Burn the potato, snapshot the pot and open claiming. Returns the jackpot.
    pub fn explode(&mut self, round: &mut Round, ledger: &mut Participant, hold_time: u64) -> Result<u64> {
        require!(self.state == GameState::InFlight, PotatoError::NotInFlight);
        credit_hold_time(round, ledger, hold_time)?;

        let jackpot = self.pot;
        round.open_claiming(jackpot)?;
        self.outstanding_jackpot = self.outstanding_jackpot
            .checked_add(jackpot)
            .ok_or(PotatoError::MathOverflow)?;
        self.pot = 0;

        self.potato_alive     = false;
        self.holder           = Pubkey::default();
        self.pending_receiver = Pubkey::default();
        self.state            = GameState::GameOver;
        self.total_explosions = self.total_explosions.wrapping_add(1);
        Ok(jackpot)
    }

    /// Pass the potato to the pending receiver. Returns the new holder.
    pub fn land(
        &mut self,
        round:     &mut Round,
        ledger:    &mut Participant,
        hold_time: u64,
        now:       i64,
        minted:    u64,
    ) -> Result<Pubkey> {
        require!(self.state == GameState::InFlight, PotatoError::NotInFlight);
        credit_hold_time(round, ledger, hold_time)?;

        let receiver = self.pending_receiver;
        self.holder             = receiver;
        self.last_transfer_time = now;
        self.pending_receiver   = Pubkey::default();
        self.state              = GameState::Idle;
        self.total_landings     = self.total_landings.wrapping_add(1);
        self.total_yield_minted = self.total_yield_minted.wrapping_add(minted);
        Ok(receiver)
    }

    /// Risk and timeout decide a pending toss, so neither moves under one.
    pub fn set_risk_profile(&mut self, profile: RiskProfile) -> Result<()> {
        require!(self.state != GameState::InFlight, PotatoError::TossInFlight);
        self.risk_profile = profile;
        Ok(())
    }

    pub fn set_resolve_timeout(&mut self, timeout_slots: u64) -> Result<()> {
        require!(self.state != GameState::InFlight, PotatoError::TossInFlight);
        require!(
            (MIN_RESOLVE_DELAY..=SLOT_HASHES_WINDOW).contains(&timeout_slots),
            PotatoError::InvalidResolveTimeout
        );
        self.resolve_timeout_slots = timeout_slots;
        Ok(())
    }

    pub fn set_entry_fee(&mut self, entry_fee: u64) -> u64 {
        std::mem::replace(&mut self.entry_fee, entry_fee)
    }

    /// Book the outcome of a claim payout. A failed payout either aborts or,
    /// under `Forfeit`, writes the share off so it no longer counts as owed.
    pub fn settle_claim(&mut self, round: &mut Round, share: u64, payout: Result<()>) -> Result<ClaimSettlement> {
        let settlement = match payout {
            Ok(()) => {
                round.record_payout(share)?;
                ClaimSettlement::Paid(share)
            }
            Err(err) => match self.claim_payout_policy {
                ClaimPayoutPolicy::Revert => return Err(err),
                ClaimPayoutPolicy::Forfeit => {
                    self.forfeited_jackpot = self.forfeited_jackpot
                        .checked_add(share)
                        .ok_or(PotatoError::MathOverflow)?;
                    ClaimSettlement::Forfeited(share)
                }
            },
        };
        self.outstanding_jackpot = self.outstanding_jackpot
            .checked_sub(share)
            .ok_or(PotatoError::AccountingBroken)?;
        Ok(settlement)
    }

    pub fn propose_authority(&mut self, new_authority: Pubkey, now: i64) -> Result<()> {
        require_keys_neq!(new_authority, self.authority,    PotatoError::InvalidRecipient);
        require_keys_neq!(new_authority, Pubkey::default(), PotatoError::InvalidRecipient);

        self.pending_authority = Some(new_authority);
        self.authority_transfer_at = now + AUTH_TIMELOCK;
        Ok(())
    }

    pub fn accept_authority(&mut self, signer: Pubkey, now: i64) -> Result<()> {
        let new_auth = self.pending_authority.ok_or(PotatoError::NoPendingAuthority)?;
        require_keys_eq!(signer, new_auth, PotatoError::NotAuthority);
        require!(now >= self.authority_transfer_at, PotatoError::TimelockActive);

        self.authority = new_auth;
        self.pending_authority = None;
        self.authority_transfer_at = 0;
        Ok(())
    }
}

#[account]
#[derive(Default)]
pub struct Round {
    pub game:             Pubkey,   // 32
    pub index:            u64,      // 8
    pub started_at:       i64,      // 8
    pub total_hold_time:  u64,      // 8
    pub final_jackpot:    u64,      // 8
    pub total_paid:       u64,      // 8
    pub claims:           u64,      // 8
    pub is_claiming_open: bool,     // 1
    pub bump:             u8,       // 1
}

impl Round {
    pub const LEN: usize = 32 + 8 + 8 + 8 + 8 + 8 + 8 + 1 + 1;

    pub fn open(&mut self, game: Pubkey, index: u64, now: i64, bump: u8) {
        self.game       = game;
        self.index      = index;
        self.started_at = now;
        self.bump       = bump;
    }

    /// Set once per round, when the potato explodes.
    pub fn open_claiming(&mut self, final_jackpot: u64) -> Result<()> {
        require!(!self.is_claiming_open, PotatoError::JackpotAlreadySnapshotted);
        self.final_jackpot = final_jackpot;
        self.is_claiming_open = true;
        Ok(())
    }

    /// Mark the participant claimed and return the share owed to them.
    /// The flag is set here, before the caller attempts any payout.
    pub fn claim_share(&mut self, ledger: &mut Participant) -> Result<u64> {
        require!(self.is_claiming_open, PotatoError::ClaimingNotOpen);
        require!(!ledger.claimed,       PotatoError::AlreadyClaimed);
        require!(ledger.hold_time > 0,  PotatoError::NoHoldTime);

        let share = jackpot_share(self.final_jackpot, ledger.hold_time, self.total_hold_time)?;
        require!(share > 0, PotatoError::ZeroShare);

        ledger.claimed = true;
        self.claims = self.claims.wrapping_add(1);
        Ok(share)
    }

    pub fn record_payout(&mut self, amount: u64) -> Result<()> {
        let paid = self.total_paid.checked_add(amount).ok_or(PotatoError::MathOverflow)?;
        require!(paid <= self.final_jackpot, PotatoError::AccountingBroken);
        self.total_paid = paid;
        Ok(())
    }
}

#[account]
#[derive(Default)]
pub struct Participant {
    pub round:     Pubkey,  // 32
    pub player:    Pubkey,  // 32
    pub hold_time: u64,     // 8
    pub claimed:   bool,    // 1
    pub bump:      u8,      // 1
}

impl Participant {
    pub const LEN: usize = 32 + 32 + 8 + 1 + 1;

    /// Fill in identity on first use of an `init_if_needed` ledger entry.
    pub fn bind(&mut self, round: Pubkey, player: Pubkey, bump: u8) {
        if self.player == Pubkey::default() {
            self.round  = round;
            self.player = player;
            self.bump   = bump;
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════
//  ERRORS & EVENTS
// ══════════════════════════════════════════════════════════════════════════

#[error_code]
pub enum PotatoError {
    // State: wrong phase, retry later
    #[msg("Potato is not idle")]
    NotIdle,
    #[msg("No toss is in flight")]
    NotInFlight,
    #[msg("Too early to resolve (commitment slot not final)")]
    ResolutionTooEarly,
    #[msg("Claiming is not open for this round")]
    ClaimingNotOpen,
    #[msg("Round still has a live potato")]
    RoundStillActive,
    #[msg("Round index must be the current round + 1")]
    RoundMismatch,
    #[msg("Jackpot already snapshotted for this round")]
    JackpotAlreadySnapshotted,
    #[msg("A toss is awaiting resolution")]
    TossInFlight,

    // Authorization
    #[msg("Caller is not the potato holder")]
    NotHolder,
    #[msg("Caller is not the game authority")]
    NotAuthority,

    // Validation
    #[msg("Invalid recipient")]
    InvalidRecipient,
    #[msg("Fee does not match the entry fee")]
    WrongEntryFee,
    #[msg("Risk thresholds and percentages differ in length")]
    RiskProfileLengthMismatch,
    #[msg("Risk percentage above 100")]
    RiskPercentageTooHigh,
    #[msg("Too many risk tiers (max 8)")]
    TooManyRiskTiers,
    #[msg("Risk tiers must ascend")]
    RiskTiersNotMonotonic,
    #[msg("Resolve timeout must be 2-512 slots")]
    InvalidResolveTimeout,
    #[msg("Jackpot share already claimed")]
    AlreadyClaimed,
    #[msg("No hold time recorded this round")]
    NoHoldTime,
    #[msg("Computed share is zero")]
    ZeroShare,
    #[msg("Yield rate above maximum")]
    YieldRateTooHigh,
    #[msg("Holder reward token account required to mint yield")]
    RewardAccountMissing,

    // Payout
    #[msg("Payout failed")]
    PayoutFailed,

    // Guard
    #[msg("Reentrant call rejected")]
    ReentrancyDetected,

    #[msg("Slot hash not found")]
    SlotHashNotFound,
    #[msg("Math overflow")]
    MathOverflow,
    #[msg("Accounting invariant violated")]
    AccountingBroken,
    #[msg("Timelock active")]
    TimelockActive,
    #[msg("No pending authority transfer")]
    NoPendingAuthority,
}

#[event] pub struct RoundStarted        { pub round: u64, pub holder: Pubkey, pub started_at: i64 }
#[event] pub struct PotatoTossed        { pub round: u64, pub from: Pubkey, pub to: Pubkey, pub fee: u64, pub toss_slot: u64 }
#[event] pub struct PotatoExploded      { pub round: u64, pub holder: Pubkey, pub hold_time: u64, pub risk: u8, pub draw: Option<u8>, pub forced: bool }
#[event] pub struct PotatoLanded        { pub round: u64, pub from: Pubkey, pub to: Pubkey, pub hold_time: u64, pub risk: u8, pub draw: u8 }
#[event] pub struct YieldCredited       { pub round: u64, pub holder: Pubkey, pub hold_time: u64, pub amount: u64 }
#[event] pub struct ClaimingOpened      { pub round: u64, pub final_jackpot: u64, pub total_hold_time: u64 }
#[event] pub struct JackpotShareClaimed { pub round: u64, pub claimant: Pubkey, pub hold_time: u64, pub amount: u64 }
#[event] pub struct JackpotPayoutFailed { pub round: u64, pub claimant: Pubkey, pub amount: u64 }
#[event] pub struct RiskProfileUpdated  { pub thresholds: Vec<u64>, pub percentages: Vec<u8> }
#[event] pub struct EntryFeeUpdated     { pub old_fee: u64, pub new_fee: u64 }
#[event] pub struct YieldRateUpdated    { pub old_rate: u64, pub new_rate: u64 }
#[event] pub struct ResolveTimeoutUpdated   { pub timeout_slots: u64 }
#[event] pub struct ClaimPayoutPolicyUpdated { pub policy: ClaimPayoutPolicy }
#[event] pub struct AuthorityTransferProposed { pub current: Pubkey, pub proposed: Pubkey, pub unlocks_at: i64 }
#[event] pub struct AuthorityTransferCancelled { pub authority: Pubkey }
#[event] pub struct AuthorityTransferred { pub old_authority: Pubkey, pub new_authority: Pubkey }
