//! Lucky-number draw
//!
//! Resolution is pure: it sees the game and the pick and returns an outcome
//! without touching any store. The executor resolves first and then commits
//! debit, payout and bet record in a single transition.

use rand::Rng;
use shared::{Money, MAX_LUCKY_NUMBER, MIN_LUCKY_NUMBER};

use crate::domain::{BetOutcome, GameConfig};
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub outcome: BetOutcome,
    pub payout: Money,
    pub drawn_number: u8,
}

pub trait GameResolver: Send + Sync {
    fn resolve(&self, game: &GameConfig, choice: u8, stake: Money) -> Result<Resolution>;
}

fn settle(game: &GameConfig, choice: u8, stake: Money, drawn_number: u8) -> Result<Resolution> {
    if drawn_number == choice {
        let payout = stake.checked_mul(game.payout_multiplier).map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "Payout overflow for game {}: {}",
                game.key(),
                e
            ))
        })?;
        Ok(Resolution {
            outcome: BetOutcome::Won,
            payout,
            drawn_number,
        })
    } else {
        Ok(Resolution {
            outcome: BetOutcome::Lost,
            payout: Money::ZERO,
            drawn_number,
        })
    }
}

/// Uniform draw over the lucky-number range
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomResolver;

impl GameResolver for RandomResolver {
    fn resolve(&self, game: &GameConfig, choice: u8, stake: Money) -> Result<Resolution> {
        let drawn = rand::thread_rng().gen_range(MIN_LUCKY_NUMBER..=MAX_LUCKY_NUMBER);
        settle(game, choice, stake, drawn)
    }
}

/// Always draws the same number; used to replay a known draw
#[derive(Debug, Clone, Copy)]
pub struct FixedDrawResolver(pub u8);

impl GameResolver for FixedDrawResolver {
    fn resolve(&self, game: &GameConfig, choice: u8, stake: Money) -> Result<Resolution> {
        settle(game, choice, stake, self.0)
    }
}
