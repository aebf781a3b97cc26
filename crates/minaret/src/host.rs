//! In-memory demo host.
//!
//! Stands in for a real game so the bridge can be run and poked at from the
//! command line. It keeps a player roster with status effects and turns a
//! handful of commands into gameplay events that are broadcast to every
//! WebSocket client.

use minaret_bridge::events::item_short_name;
use minaret_bridge::{BackendError, Broadcaster, EffectInstance, HealAggregator, HostBackend, ServerEvent};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

const USAGE: &str = "Commands: say, list, join, leave, effect, clear, heal, eat, kill, die";

/// A minimal game world driven entirely by commands.
#[derive(Debug, Default)]
pub struct DemoHost {
    players: BTreeMap<String, Vec<EffectInstance>>,
    heals: HealAggregator,
    broadcaster: Option<Broadcaster>,
    chat_log: Vec<String>,
}

impl DemoHost {
    pub fn new(broadcaster: Option<Broadcaster>) -> Self {
        Self {
            broadcaster,
            ..Self::default()
        }
    }

    /// Chat lines shown so far, oldest first.
    pub fn chat_log(&self) -> &[String] {
        &self.chat_log
    }

    fn emit(&self, event: ServerEvent) {
        debug!("🎯 Host event {}", event.name());
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.broadcast_event(&event);
        }
    }

    fn require_online(&self, player: &str) -> Result<(), BackendError> {
        if self.players.contains_key(player) {
            Ok(())
        } else {
            Err(BackendError::Failed(Some(format!("No player was found: {player}"))))
        }
    }

    fn join(&mut self, player: &str) -> i32 {
        if self.players.contains_key(player) {
            return 0;
        }
        self.players.insert(player.to_string(), Vec::new());
        self.emit(ServerEvent::PlayerJoin {
            player: player.to_string(),
        });
        1
    }

    fn leave(&mut self, player: &str) -> i32 {
        if self.players.remove(player).is_none() {
            return 0;
        }
        self.heals.forget(player);
        self.emit(ServerEvent::PlayerLeave {
            player: player.to_string(),
        });
        1
    }

    fn effect(&mut self, args: &[&str]) -> Result<i32, BackendError> {
        let [player, effect, rest @ ..] = args else {
            return Err(syntax("effect <player> <effect> [seconds|infinite] [amplifier]"));
        };
        self.require_online(player)?;

        let duration = match rest.first().copied() {
            None => Some(30 * 20),
            Some("infinite") => None,
            Some(seconds) => Some(parse::<u32>(seconds)?.saturating_mul(20)),
        };
        let amplifier = rest.get(1).map(|value| parse::<i32>(value)).transpose()?.unwrap_or(0);
        let effect = if effect.contains(':') {
            effect.to_string()
        } else {
            format!("minecraft:{effect}")
        };

        let effects = self.players.entry(player.to_string()).or_default();
        effects.retain(|existing| existing.effect != effect);
        effects.push(EffectInstance::new(effect, duration, amplifier));
        Ok(1)
    }

    fn clear(&mut self, player: &str) -> Result<i32, BackendError> {
        self.require_online(player)?;
        let effects = self.players.entry(player.to_string()).or_default();
        let removed = effects.len();
        effects.clear();
        Ok(i32::try_from(removed).unwrap_or(i32::MAX))
    }

    fn heal(&mut self, player: &str, amount: &str) -> Result<i32, BackendError> {
        self.require_online(player)?;
        let amount = parse::<f32>(amount)?;
        if let Some(event) = self.heals.record(player, amount, Instant::now()) {
            self.emit(event);
        }
        Ok(1)
    }
}

impl HostBackend for DemoHost {
    fn broadcast_chat(&mut self, line: &str) {
        info!("💬 {line}");
        self.chat_log.push(line.to_string());
    }

    fn execute_command(&mut self, command: &str) -> Result<i32, BackendError> {
        let args: Vec<&str> = command.split_whitespace().collect();
        match args.as_slice() {
            ["say", words @ ..] if !words.is_empty() => {
                self.broadcast_chat(&format!("[Server] {}", words.join(" ")));
                Ok(1)
            }
            ["list"] => {
                let names: Vec<&str> = self.players.keys().map(String::as_str).collect();
                info!("👥 {} players online: {}", names.len(), names.join(", "));
                Ok(i32::try_from(names.len()).unwrap_or(i32::MAX))
            }
            ["join", player] => Ok(self.join(player)),
            ["leave", player] => Ok(self.leave(player)),
            ["effect", rest @ ..] => self.effect(rest),
            ["clear", player] => self.clear(player),
            ["heal", player, amount] => self.heal(player, amount),
            ["eat", player, item, nutrition, saturation] => {
                self.require_online(player)?;
                self.emit(ServerEvent::PlayerEat {
                    player: player.to_string(),
                    item: item_short_name(item).to_string(),
                    nutrition: parse(nutrition)?,
                    saturation: parse(saturation)?,
                });
                Ok(1)
            }
            ["kill", player, mob] => {
                self.require_online(player)?;
                self.emit(ServerEvent::PlayerKill {
                    player: player.to_string(),
                    mob: mob.to_string(),
                });
                Ok(1)
            }
            ["die", player, cause @ ..] if !cause.is_empty() => {
                self.require_online(player)?;
                self.players.entry(player.to_string()).or_default().clear();
                self.emit(ServerEvent::PlayerDeath {
                    player: player.to_string(),
                    cause: cause.join(" "),
                });
                Ok(1)
            }
            _ => Err(syntax(&format!("Unknown command: {command}. {USAGE}"))),
        }
    }

    fn active_effects(&self, player: &str) -> Result<Option<Vec<EffectInstance>>, BackendError> {
        Ok(self.players.get(player).cloned())
    }
}

fn syntax(message: &str) -> BackendError {
    BackendError::Syntax(message.to_string())
}

fn parse<T: std::str::FromStr>(value: &str) -> Result<T, BackendError> {
    value
        .parse()
        .map_err(|_| syntax(&format!("Invalid number: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_with(players: &[&str]) -> DemoHost {
        let mut host = DemoHost::new(None);
        for player in players {
            assert_eq!(host.execute_command(&format!("join {player}")), Ok(1));
        }
        host
    }

    #[test]
    fn test_say_reaches_chat() {
        let mut host = DemoHost::new(None);
        assert_eq!(host.execute_command("say hello there"), Ok(1));
        assert_eq!(host.chat_log(), ["[Server] hello there"]);
    }

    #[test]
    fn test_join_twice_has_no_effect() {
        let mut host = host_with(&["alice"]);
        assert_eq!(host.execute_command("join alice"), Ok(0));
        assert_eq!(host.execute_command("list"), Ok(1));
    }

    #[test]
    fn test_effects_are_listed() {
        let mut host = host_with(&["alice"]);
        assert_eq!(host.execute_command("effect alice speed 10 1"), Ok(1));
        assert_eq!(host.execute_command("effect alice minecraft:night_vision infinite"), Ok(1));

        let effects = host.active_effects("alice").unwrap().unwrap();
        assert_eq!(
            effects,
            vec![
                EffectInstance::new("minecraft:speed", Some(200), 1),
                EffectInstance::new("minecraft:night_vision", None, 0),
            ]
        );
        assert_eq!(host.execute_command("clear alice"), Ok(2));
        assert_eq!(host.active_effects("alice"), Ok(Some(Vec::new())));
    }

    #[test]
    fn test_unknown_player() {
        let mut host = DemoHost::new(None);
        assert_eq!(host.active_effects("bob"), Ok(None));
        assert_eq!(
            host.execute_command("heal bob 2"),
            Err(BackendError::Failed(Some("No player was found: bob".to_string())))
        );
    }

    #[test]
    fn test_bad_input_is_a_syntax_error() {
        let mut host = host_with(&["alice"]);
        assert!(matches!(host.execute_command("fly"), Err(BackendError::Syntax(_))));
        assert!(matches!(host.execute_command("heal alice lots"), Err(BackendError::Syntax(_))));
        assert!(matches!(host.execute_command("effect alice"), Err(BackendError::Syntax(_))));
    }

    #[test]
    fn test_leave_removes_player() {
        let mut host = host_with(&["alice"]);
        assert_eq!(host.execute_command("leave alice"), Ok(1));
        assert_eq!(host.execute_command("leave alice"), Ok(0));
        assert_eq!(host.active_effects("alice"), Ok(None));
    }
}
