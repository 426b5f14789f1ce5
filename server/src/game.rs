//! Authoritative game state: command validation, server-only tick phases
//! and broadcast emission.
//!
//! Every accepted mutation is serialized into the outbox as a framed
//! GAME_COMMAND packet; the owning session fans those out to its members.
//! Keeping broadcasts in a queue instead of writing to sockets directly
//! makes the whole simulation testable without any networking.

use log::info;
use rand::seq::SliceRandom;
use rand::Rng;

use shared::commands::{
    ChargeCommand, DestroyEntityCommand, GameCommand, PlaySfxCommand, SetHealthCommand, Sfx,
    SpawnProjectileCommand,
};
use shared::components::WeaponKind;
use shared::entity::{Entity, Prefab};
use shared::game_state::GameState;
use shared::messages::{GameCommandMessage, NetMessage};
use shared::packet::Packet;
use shared::vec2::Vec2;

use crate::session::SessionPlayer;

/// Identity of the connection a client-authored command came from.
pub struct CommandContext {
    pub player_tank: Option<Entity>,
}

pub struct ServerGameState {
    pub game: GameState,
    outbox: Vec<Packet>,
}

impl Default for ServerGameState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerGameState {
    pub fn new() -> Self {
        ServerGameState {
            game: GameState::new(),
            outbox: Vec::new(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        ServerGameState {
            game: GameState::with_seed(seed),
            outbox: Vec::new(),
        }
    }

    /// Framed broadcast packets produced since the last drain.
    pub fn drain_outbox(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.outbox)
    }

    /// Generates the level and one tank per connected player and NPC.
    pub fn prepare(&mut self, players: &mut [Option<SessionPlayer>], num_npcs: usize) {
        info!("Preparing level, creating player tanks");

        const PLANET_PADDING: Vec2 = Vec2::new(300.0, 300.0);
        const PLANET_SPACING: f32 = 480.0;
        const PLANET_GRID: (usize, usize) = (4, 4);

        let connected = players.iter().flatten().count();
        let num_planets = connected + num_npcs + 3;

        let game = &mut self.game;
        game.background_color = [
            game.rng.gen_range(4..=10),
            game.rng.gen_range(4..=20),
            game.rng.gen_range(20..=40),
            255,
        ];
        game.size = PLANET_PADDING * 2.0
            + Vec2::new(PLANET_GRID.0 as f32, PLANET_GRID.1 as f32) * PLANET_SPACING;

        let mut planets = Vec::with_capacity(num_planets);

        for i in 0..num_planets {
            let planet = game.entities.spawn(Prefab::Planet);
            planets.push(planet);

            let displacement = Vec2::new(
                game.rng.gen_range(-170.0..=170.0),
                game.rng.gen_range(-170.0..=170.0),
            );
            let position = PLANET_PADDING
                + Vec2::new((i % PLANET_GRID.0) as f32, (i / PLANET_GRID.1) as f32)
                    * PLANET_SPACING
                + displacement;
            let mass = game.rng.gen_range(17.0..=32.0);
            let radius = game.rng.gen_range(70.0..=120.0);

            if let Some(components) = game.entities.get_mut(planet) {
                if let Some(position_component) = components.position.as_mut() {
                    position_component.value = position;
                }
                if let Some(mass_component) = components.mass.as_mut() {
                    mass_component.value = mass;
                }
                if let Some(planet_component) = components.planet.as_mut() {
                    planet_component.radius = radius;
                    planet_component.initial_position = position;
                }
            }
        }

        planets.shuffle(&mut game.rng);

        fn spawn_tank(game: &mut GameState, planet: Entity) -> Entity {
            let tank = game.entities.spawn(Prefab::Tank);
            let start_angle = game.rng.gen_range(0.0..=360.0);

            if let Some(components) = game.entities.get_mut(tank) {
                if let Some(tank_component) = components.tank.as_mut() {
                    tank_component.planet = planet;
                }
                if let Some(planet_position) = components.planet_position.as_mut() {
                    planet_position.value = start_angle;
                }
                if let Some(health) = components.health.as_mut() {
                    health.value = 100.0;
                    health.max = 100.0;
                }
            }

            tank
        }

        let mut tank_index = 0;

        for player in players.iter_mut().flatten() {
            let tank = spawn_tank(game, planets[tank_index]);
            tank_index += 1;
            player.tank = Some(tank);
        }

        for _ in 0..num_npcs {
            spawn_tank(game, planets[tank_index]);
            tank_index += 1;
        }
    }

    /// One authoritative simulation step.
    pub fn tick(&mut self, dt: f32) {
        self.game.advance_clock(dt);
        self.autofire_machineguns();
        self.game.integrate(dt);
        self.check_projectile_collisions();
        self.expire_projectiles(dt);
        self.destroy_dead_entities();
    }

    /// Machine guns auto-repeat every tick while the fire button is held.
    fn autofire_machineguns(&mut self) {
        let mut firing = Vec::new();
        self.game.entities.each(|entity, components| {
            if let (Some(tank), Some(_)) = (components.tank.as_ref(), components.charging.as_ref())
            {
                if tank.weapon == WeaponKind::Machinegun {
                    firing.push(entity);
                }
            }
        });

        for entity in firing {
            self.fire_projectile(entity);
        }
    }

    fn check_projectile_collisions(&mut self) {
        let mut projectiles = Vec::new();
        self.game.entities.each(|entity, components| {
            if let (Some(projectile), Some(position), Some(_)) = (
                components.projectile.as_ref(),
                components.position.as_ref(),
                components.velocity.as_ref(),
            ) {
                projectiles.push((entity, *projectile, position.value));
            }
        });

        let mut tank_entities = Vec::new();
        self.game.entities.each(|entity, components| {
            if components.tank.is_some() && components.health.is_some() {
                tank_entities.push(entity);
            }
        });
        let tanks: Vec<(Entity, Vec2)> = tank_entities
            .into_iter()
            .filter_map(|entity| Some((entity, self.game.tank_world_position(entity)?)))
            .collect();

        let mut planets = Vec::new();
        self.game.entities.each(|entity, components| {
            if let (Some(planet), Some(position)) =
                (components.planet.as_ref(), components.position.as_ref())
            {
                planets.push((planet.radius, position.value));
            }
        });

        for (projectile_entity, projectile, projectile_position) in projectiles {
            let mut destroyed = false;

            for &(tank_entity, tank_position) in &tanks {
                if tank_entity == projectile.firing_entity {
                    continue;
                }

                let diff = tank_position - projectile_position;
                if diff.length_squared() < projectile.hit_radius * projectile.hit_radius {
                    let health = match self
                        .game
                        .entities
                        .get_mut(tank_entity)
                        .and_then(|components| components.health.as_mut())
                    {
                        Some(health) => {
                            health.value -= projectile.impact_damage;
                            *health
                        }
                        None => continue,
                    };

                    if !destroyed {
                        self.destroy_entity(projectile_entity);
                        destroyed = true;
                    }

                    self.broadcast_command(&GameCommand::SetHealth(SetHealthCommand {
                        target: tank_entity,
                        health: health.value,
                        max: health.max,
                    }));
                }
            }

            if destroyed {
                continue;
            }

            for &(planet_radius, planet_position) in &planets {
                let diff = planet_position - projectile_position;
                let collision_radius = planet_radius + projectile.radius;

                if diff.length_squared() < collision_radius * collision_radius {
                    let had_bounce = self
                        .game
                        .entities
                        .get_mut(projectile_entity)
                        .map(|components| components.bounce.take().is_some())
                        .unwrap_or(false);

                    // A consumed bounce trait keeps the projectile alive
                    // once. TODO: compute the bounce velocity response.
                    if !had_bounce {
                        self.destroy_entity(projectile_entity);
                        break;
                    }
                }
            }
        }
    }

    fn expire_projectiles(&mut self, dt: f32) {
        let mut expired = Vec::new();
        self.game.entities.each_mut(|entity, components| {
            if let Some(ttl) = components.ttl.as_mut() {
                ttl.value -= dt;
                if ttl.value <= 0.0 {
                    expired.push(entity);
                }
            }
        });

        for entity in expired {
            self.destroy_entity(entity);
        }
    }

    fn destroy_dead_entities(&mut self) {
        let mut dead = Vec::new();
        self.game.entities.each(|entity, components| {
            if let Some(health) = components.health.as_ref() {
                if health.value <= 0.0 {
                    dead.push(entity);
                }
            }
        });

        for entity in dead {
            self.destroy_entity(entity);
        }
    }

    /// Destroys an entity and echoes the destruction to every replica. Tank
    /// deaths additionally announce their explosion sound first.
    pub fn destroy_entity(&mut self, entity: Entity) {
        let is_tank = self
            .game
            .entities
            .get(entity)
            .map(|components| components.tank.is_some())
            .unwrap_or(false);

        if is_tank {
            self.broadcast_command(&GameCommand::PlaySfx(PlaySfxCommand {
                sfx: Sfx::TankExplosion,
            }));
        }

        self.game.entities.destroy(entity);

        self.broadcast_command(&GameCommand::DestroyEntity(DestroyEntityCommand {
            target: entity,
        }));
    }

    /// Fires if charge/cooldown allow, broadcasting each spawned projectile
    /// and the fire sound. Returns false if nothing was spawned.
    pub fn fire_projectile(&mut self, firing_tank: Entity) -> bool {
        let spawned = self.game.fire(firing_tank, false);
        if spawned.is_empty() {
            return false;
        }

        let weapon = match self
            .game
            .entities
            .get(firing_tank)
            .and_then(|components| components.tank.as_ref())
        {
            Some(tank) => tank.weapon,
            None => return false,
        };

        for projectile in &spawned {
            let (position, velocity) = match self.game.entities.get(*projectile) {
                Some(components) => (
                    components.position.map(|p| p.value).unwrap_or(Vec2::ZERO),
                    components.velocity.map(|v| v.value).unwrap_or(Vec2::ZERO),
                ),
                None => continue,
            };

            self.broadcast_command(&GameCommand::SpawnProjectile(SpawnProjectileCommand {
                target: *projectile,
                firing_entity: firing_tank,
                position,
                velocity,
                weapon,
            }));
        }

        self.broadcast_command(&GameCommand::PlaySfx(PlaySfxCommand { sfx: Sfx::TankFire }));

        true
    }

    /// Deserializes and applies one client-authored command.
    pub fn handle_command_packet(&mut self, context: &CommandContext, packet: &mut Packet) -> bool {
        let mut command = match GameCommand::deserialize(packet) {
            Some(command) => command,
            None => return false,
        };

        self.handle_command(context, &mut command)
    }

    /// Validates and applies a command. Accepted commands are broadcast
    /// verbatim (after the handler's authoritative fix-ups) to the session.
    pub fn handle_command(&mut self, context: &CommandContext, command: &mut GameCommand) -> bool {
        let accepted = match command {
            GameCommand::MoveTank(move_tank) => {
                if context.player_tank != Some(move_tank.entity) {
                    false
                } else {
                    match self
                        .game
                        .entities
                        .get_mut(move_tank.entity)
                        .and_then(|components| components.planet_position.as_mut())
                    {
                        Some(planet_position) => {
                            planet_position.delta = move_tank.velocity;
                            // Echo the authoritative position so replicas
                            // snap before integrating the new delta.
                            move_tank.planet_position = planet_position.value;
                            true
                        }
                        None => false,
                    }
                }
            }

            GameCommand::RotateTurret(rotate_turret) => {
                if context.player_tank != Some(rotate_turret.entity) {
                    false
                } else {
                    match self
                        .game
                        .entities
                        .get_mut(rotate_turret.entity)
                        .and_then(|components| components.tank.as_mut())
                    {
                        Some(tank) => {
                            if rotate_turret.is_absolute {
                                tank.target_turret_rotation = rotate_turret.target_rotation;
                            } else {
                                tank.flags = rotate_turret.flags;
                            }
                            true
                        }
                        None => false,
                    }
                }
            }

            GameCommand::Charge(charge) => self.handle_charge_command(context, *charge),

            GameCommand::SwitchWeapon(switch_weapon) => {
                match context.player_tank.and_then(|tank| {
                    self.game
                        .entities
                        .get_mut(tank)
                        .and_then(|components| components.tank.as_mut())
                }) {
                    Some(tank) => {
                        tank.weapon = switch_weapon.weapon;
                        true
                    }
                    None => false,
                }
            }

            // Replica-only commands are never accepted from clients.
            _ => false,
        };

        if accepted {
            self.broadcast_command(command);
        }

        accepted
    }

    fn handle_charge_command(&mut self, context: &CommandContext, charge: ChargeCommand) -> bool {
        let player_tank = match context.player_tank {
            Some(player_tank) if player_tank == charge.entity => player_tank,
            _ => return false,
        };

        let time = self.game.time;
        let (is_charging, weapon) = match self.game.entities.get(player_tank) {
            Some(components) => match components.tank.as_ref() {
                Some(tank) => (components.charging.is_some(), tank.weapon),
                None => return false,
            },
            None => return false,
        };

        if charge.fire {
            if !is_charging {
                // Release without a press.
                return false;
            }

            if weapon == WeaponKind::Machinegun {
                // Machine guns fire while held; release just stops them.
                if let Some(components) = self.game.entities.get_mut(player_tank) {
                    components.charging = None;
                }
                return true;
            }

            let fired = self.fire_projectile(player_tank);
            if let Some(components) = self.game.entities.get_mut(player_tank) {
                components.charging = None;
            }
            fired
        } else {
            if is_charging {
                // Duplicate press: restart the timer but reject the command.
                if let Some(charging) = self
                    .game
                    .entities
                    .get_mut(player_tank)
                    .and_then(|components| components.charging.as_mut())
                {
                    charging.start_time = time;
                }
                return false;
            }

            if let Some(components) = self.game.entities.get_mut(player_tank) {
                components.charging = Some(shared::components::Charging { start_time: time });
            }
            true
        }
    }

    fn broadcast_command(&mut self, command: &GameCommand) {
        let mut packet = Packet::new();
        GameCommandMessage.serialize(&mut packet);
        command.serialize(&mut packet);
        packet.write_header();
        self.outbox.push(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::messages::NetMessageType;

    fn decode_broadcast(packet: Packet) -> GameCommand {
        let mut packet = Packet::from_frame(packet.into_bytes());
        let tag = packet.read_u8().unwrap();
        assert_eq!(
            NetMessageType::from_u8(tag),
            Some(NetMessageType::GameCommand)
        );
        let command = GameCommand::deserialize(&mut packet).unwrap();
        assert!(packet.is_valid_and_finished());
        command
    }

    fn test_world() -> (ServerGameState, Entity, Entity) {
        let mut state = ServerGameState::with_seed(7);
        state.game.size = Vec2::new(2000.0, 2000.0);

        let planet = state.game.entities.spawn(Prefab::Planet);
        {
            let components = state.game.entities.get_mut(planet).unwrap();
            components.position.as_mut().unwrap().value = Vec2::new(1000.0, 1000.0);
            components.mass.as_mut().unwrap().value = 20.0;
            let planet_component = components.planet.as_mut().unwrap();
            planet_component.initial_position = Vec2::new(1000.0, 1000.0);
            planet_component.radius = 100.0;
        }

        let tank = state.game.entities.spawn(Prefab::Tank);
        {
            let components = state.game.entities.get_mut(tank).unwrap();
            components.tank.as_mut().unwrap().planet = planet;
            *components.health.as_mut().unwrap() = shared::components::Health {
                value: 100.0,
                max: 100.0,
            };
        }

        (state, planet, tank)
    }

    #[test]
    fn test_tank_destruction_broadcasts_sfx_then_destroy() {
        let (mut state, _, tank) = test_world();

        state.destroy_entity(tank);

        let packets = state.drain_outbox();
        assert_eq!(packets.len(), 2);

        let mut packets = packets.into_iter();
        match decode_broadcast(packets.next().unwrap()) {
            GameCommand::PlaySfx(play_sfx) => assert_eq!(play_sfx.sfx, Sfx::TankExplosion),
            other => panic!("expected PlaySfx first, got {:?}", other),
        }
        match decode_broadcast(packets.next().unwrap()) {
            GameCommand::DestroyEntity(destroy) => assert_eq!(destroy.target, tank),
            other => panic!("expected DestroyEntity second, got {:?}", other),
        }

        assert!(!state.game.entities.is_valid(tank));
    }

    #[test]
    fn test_move_tank_requires_matching_actor() {
        let (mut state, _, tank) = test_world();

        let mut command = GameCommand::MoveTank(shared::commands::MoveTankCommand {
            entity: tank,
            planet_position: 0.0,
            velocity: 0.5,
        });

        // A context owning a different tank is rejected, nothing broadcast.
        let context = CommandContext {
            player_tank: Some(Entity::from_bits(9999)),
        };
        assert!(!state.handle_command(&context, &mut command));
        assert!(state.drain_outbox().is_empty());

        // The owning context is accepted and the echo carries the position.
        let context = CommandContext {
            player_tank: Some(tank),
        };
        assert!(state.handle_command(&context, &mut command));
        assert_eq!(state.drain_outbox().len(), 1);

        let delta = state
            .game
            .entities
            .get(tank)
            .unwrap()
            .planet_position
            .unwrap()
            .delta;
        assert_eq!(delta, 0.5);
    }

    #[test]
    fn test_charge_then_release_spawns_projectile() {
        let (mut state, _, tank) = test_world();
        state.game.time = 1000.0;
        let context = CommandContext {
            player_tank: Some(tank),
        };

        let mut press = GameCommand::Charge(ChargeCommand {
            entity: tank,
            fire: false,
        });
        assert!(state.handle_command(&context, &mut press));
        assert!(state.game.entities.get(tank).unwrap().charging.is_some());
        state.drain_outbox();

        state.game.time += 10.0;

        let mut release = GameCommand::Charge(ChargeCommand {
            entity: tank,
            fire: true,
        });
        assert!(state.handle_command(&context, &mut release));
        assert!(state.game.entities.get(tank).unwrap().charging.is_none());

        // Spawn command, fire sfx and the accepted charge command itself.
        let packets = state.drain_outbox();
        let commands: Vec<GameCommand> = packets.into_iter().map(decode_broadcast).collect();
        assert!(commands
            .iter()
            .any(|command| matches!(command, GameCommand::SpawnProjectile(_))));
        assert!(commands.iter().any(|command| matches!(
            command,
            GameCommand::PlaySfx(PlaySfxCommand { sfx: Sfx::TankFire })
        )));
        assert!(commands
            .iter()
            .any(|command| matches!(command, GameCommand::Charge(_))));
    }

    #[test]
    fn test_release_without_press_is_rejected() {
        let (mut state, _, tank) = test_world();
        let context = CommandContext {
            player_tank: Some(tank),
        };

        let mut release = GameCommand::Charge(ChargeCommand {
            entity: tank,
            fire: true,
        });
        assert!(!state.handle_command(&context, &mut release));
        assert!(state.drain_outbox().is_empty());
    }

    #[test]
    fn test_machinegun_autofires_while_held() {
        let (mut state, _, tank) = test_world();
        state.game.time = 1000.0;

        {
            let components = state.game.entities.get_mut(tank).unwrap();
            components.tank.as_mut().unwrap().weapon = WeaponKind::Machinegun;
            components.charging = Some(shared::components::Charging { start_time: 1000.0 });
        }

        let before = state.game.entities.len();
        state.tick(1.0);
        let after = state.game.entities.len();
        assert!(after > before, "autofire should spawn projectiles");

        // Held fire keeps charging attached for the next tick.
        assert!(state.game.entities.get(tank).unwrap().charging.is_some());
    }

    #[test]
    fn test_projectile_hits_tank() {
        let (mut state, planet, tank) = test_world();

        // A second tank to take the hit, well away from the shooter.
        let victim = state.game.entities.spawn(Prefab::Tank);
        {
            let components = state.game.entities.get_mut(victim).unwrap();
            components.tank.as_mut().unwrap().planet = planet;
            components.planet_position.as_mut().unwrap().value = 180.0;
            *components.health.as_mut().unwrap() = shared::components::Health {
                value: 100.0,
                max: 100.0,
            };
        }

        let victim_position = state.game.tank_world_position(victim).unwrap();

        let projectile = state.game.entities.spawn(Prefab::Projectile);
        {
            let components = state.game.entities.get_mut(projectile).unwrap();
            components.position.as_mut().unwrap().value = victim_position;
            components.mass.as_mut().unwrap().value = 10.0;
            components.ttl.as_mut().unwrap().value = 100.0;
            let projectile_component = components.projectile.as_mut().unwrap();
            projectile_component.firing_entity = tank;
            projectile_component.impact_damage = 40.0;
        }

        state.check_projectile_collisions();

        let health = state
            .game
            .entities
            .get(victim)
            .unwrap()
            .health
            .unwrap()
            .value;
        assert_eq!(health, 60.0);
        assert!(!state.game.entities.is_valid(projectile));

        let commands: Vec<GameCommand> = state
            .drain_outbox()
            .into_iter()
            .map(decode_broadcast)
            .collect();
        assert!(commands
            .iter()
            .any(|command| matches!(command, GameCommand::SetHealth(_))));
        assert!(commands.iter().any(|command| matches!(
            command,
            GameCommand::DestroyEntity(DestroyEntityCommand { target }) if *target == projectile
        )));
    }

    #[test]
    fn test_bounce_trait_suppresses_one_planet_impact() {
        let (mut state, planet, tank) = test_world();
        let planet_position = state
            .game
            .entities
            .get(planet)
            .unwrap()
            .position
            .unwrap()
            .value;

        let projectile = state.game.entities.spawn(Prefab::Projectile);
        {
            let components = state.game.entities.get_mut(projectile).unwrap();
            components.position.as_mut().unwrap().value = planet_position;
            components.projectile.as_mut().unwrap().firing_entity = tank;
            components.bounce = Some(shared::components::ProjectileBounce);
        }

        // First impact consumes the trait but keeps the projectile.
        state.check_projectile_collisions();
        assert!(state.game.entities.is_valid(projectile));
        assert!(state
            .game
            .entities
            .get(projectile)
            .unwrap()
            .bounce
            .is_none());

        // Second impact destroys it.
        state.check_projectile_collisions();
        assert!(!state.game.entities.is_valid(projectile));
    }

    #[test]
    fn test_ttl_expiry_destroys_projectile() {
        let (mut state, _, tank) = test_world();

        let projectile = state.game.entities.spawn(Prefab::Projectile);
        {
            let components = state.game.entities.get_mut(projectile).unwrap();
            components.position.as_mut().unwrap().value = Vec2::new(0.0, 0.0);
            components.ttl.as_mut().unwrap().value = 2.0;
            components.projectile.as_mut().unwrap().firing_entity = tank;
        }

        state.expire_projectiles(1.0);
        assert!(state.game.entities.is_valid(projectile));

        state.expire_projectiles(1.0);
        assert!(!state.game.entities.is_valid(projectile));
    }

    #[test]
    fn test_prepare_assigns_one_tank_per_player() {
        let mut state = ServerGameState::with_seed(3);
        let mut players = vec![
            Some(SessionPlayer::new(1, "ada".to_string())),
            None,
            Some(SessionPlayer::new(2, "bob".to_string())),
        ];

        state.prepare(&mut players, 2);

        let tanks: Vec<Entity> = players
            .iter()
            .flatten()
            .filter_map(|player| player.tank)
            .collect();
        assert_eq!(tanks.len(), 2);
        for tank in &tanks {
            assert!(state.game.entities.is_valid(*tank));
            let components = state.game.entities.get(*tank).unwrap();
            assert_eq!(components.health.unwrap().value, 100.0);
            assert!(state.game.entities.is_valid(components.tank.unwrap().planet));
        }

        // 2 players + 2 NPCs + (2 + 2 + 3) planets.
        assert_eq!(state.game.entities.len(), 2 + 2 + 7);
    }
}
