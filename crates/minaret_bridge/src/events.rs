//! Host-originated events pushed to every connected client.
//!
//! The host reports gameplay moments (joins, deaths, meals, ...) as
//! [`ServerEvent`]s and broadcasts them through
//! [`Broadcaster::broadcast_event`](crate::server::Broadcaster::broadcast_event).
//! Healing arrives in many tiny increments, so it is batched per player by
//! [`HealAggregator`] before being reported.

use crate::json::{Map, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Accumulated healing that triggers a `player_heal` event.
pub const HEAL_THRESHOLD: f32 = 10.0;

/// Maximum time between two `player_heal` events for a healing player.
pub const HEAL_TIMEOUT: Duration = Duration::from_secs(60);

/// A gameplay event broadcast to clients as `{"event": "<name>", ...}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    PlayerJoin { player: String },
    PlayerLeave { player: String },
    PlayerDeath { player: String, cause: String },
    /// A player killed a mob.
    PlayerKill { player: String, mob: String },
    /// A player finished eating; `item` is the short item name.
    PlayerEat {
        player: String,
        item: String,
        nutrition: i32,
        saturation: f32,
    },
    /// Aggregated healing, in hit points rounded to one decimal.
    PlayerHeal { player: String, amount: f32 },
}

impl ServerEvent {
    /// The wire name carried in the `event` field.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::PlayerJoin { .. } => "player_join",
            ServerEvent::PlayerLeave { .. } => "player_leave",
            ServerEvent::PlayerDeath { .. } => "player_death",
            ServerEvent::PlayerKill { .. } => "player_kill",
            ServerEvent::PlayerEat { .. } => "player_eat",
            ServerEvent::PlayerHeal { .. } => "player_heal",
        }
    }

    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("event", self.name());
        match self {
            ServerEvent::PlayerJoin { player } | ServerEvent::PlayerLeave { player } => {
                object.insert("player", player.as_str());
            }
            ServerEvent::PlayerDeath { player, cause } => {
                object.insert("player", player.as_str());
                object.insert("cause", cause.as_str());
            }
            ServerEvent::PlayerKill { player, mob } => {
                object.insert("player", player.as_str());
                object.insert("mob", mob.as_str());
            }
            ServerEvent::PlayerEat {
                player,
                item,
                nutrition,
                saturation,
            } => {
                object.insert("player", player.as_str());
                object.insert("item", item.as_str());
                object.insert("nutrition", *nutrition);
                object.insert("saturation", widen(*saturation));
            }
            ServerEvent::PlayerHeal { player, amount } => {
                object.insert("player", player.as_str());
                object.insert("amount", round_tenths(*amount));
            }
        }
        Value::Object(object)
    }
}

/// Strips a dotted descriptor down to its last segment,
/// e.g. `item.minecraft.bread` becomes `bread`.
pub fn item_short_name(descriptor: &str) -> &str {
    descriptor
        .rsplit_once('.')
        .map_or(descriptor, |(_, short)| short)
}

/// Converts through the shortest decimal form, so `0.6f32` stays `0.6`.
fn widen(value: f32) -> f64 {
    value.to_string().parse().unwrap_or(f64::from(value))
}

fn round_tenths(amount: f32) -> f64 {
    format!("{amount:.1}").parse().unwrap_or(f64::from(amount))
}

#[derive(Debug, Clone, Copy)]
struct HealAccumulator {
    total: f32,
    last_emitted: Instant,
}

/// Batches heal amounts per player.
///
/// A `player_heal` event is produced once a player's running total reaches
/// [`HEAL_THRESHOLD`] or [`HEAL_TIMEOUT`] has passed since that player's
/// last event; the total then starts again from zero. A player's first
/// heal starts the timeout clock.
#[derive(Debug, Default)]
pub struct HealAggregator {
    players: HashMap<String, HealAccumulator>,
}

impl HealAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `amount` healed by `player` at `now`.
    ///
    /// # Returns
    ///
    /// The event to broadcast, if this heal crossed a threshold.
    pub fn record(&mut self, player: &str, amount: f32, now: Instant) -> Option<ServerEvent> {
        let accumulator = self
            .players
            .entry(player.to_string())
            .or_insert(HealAccumulator {
                total: 0.0,
                last_emitted: now,
            });
        accumulator.total += amount;

        let threshold_reached = accumulator.total >= HEAL_THRESHOLD;
        let timed_out = now.saturating_duration_since(accumulator.last_emitted) >= HEAL_TIMEOUT;
        if !(threshold_reached || timed_out) {
            return None;
        }

        let total = accumulator.total;
        *accumulator = HealAccumulator {
            total: 0.0,
            last_emitted: now,
        };
        Some(ServerEvent::PlayerHeal {
            player: player.to_string(),
            amount: total,
        })
    }

    /// Drops a player's pending total, e.g. when they leave.
    pub fn forget(&mut self, player: &str) {
        self.players.remove(player);
    }
}
