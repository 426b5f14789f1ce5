//! Replica game state: applies authoritative commands, produces render
//! snapshots and sound events, and runs what-if reruns for aim previews.
//!
//! The replica never resolves collisions or expiry itself; destruction and
//! damage always arrive as explicit commands from the server.

use log::debug;

use shared::commands::{GameCommand, Sfx};
use shared::entity::{Entity, Prefab};
use shared::game_state::{Color, GameState};
use shared::packet::Packet;
use shared::vec2::Vec2;

/// The replica simulation plus the pieces the presentation layer needs.
pub struct ClientGameState {
    pub game: GameState,
    pub my_tank: Option<Entity>,
    pub is_pause_menu_open: bool,
    sfx_events: Vec<Sfx>,
}

impl Default for ClientGameState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientGameState {
    pub fn new() -> Self {
        ClientGameState {
            game: GameState::new(),
            my_tank: None,
            is_pause_menu_open: false,
            sfx_events: Vec::new(),
        }
    }

    /// Loads the full world snapshot from a LOAD_LEVEL message body.
    pub fn load_level(&mut self, packet: &mut Packet) -> bool {
        self.game.deserialize(packet)
    }

    /// One replica simulation step (shared systems only).
    pub fn tick(&mut self, dt: f32) {
        self.game.tick(dt);
    }

    /// Deserializes and applies one server-authored command.
    pub fn handle_command_packet(&mut self, packet: &mut Packet) -> bool {
        let command = match GameCommand::deserialize(packet) {
            Some(command) => command,
            None => return false,
        };

        self.handle_command(&command)
    }

    /// Applies an authoritative command to the replica.
    pub fn handle_command(&mut self, command: &GameCommand) -> bool {
        match command {
            GameCommand::MoveTank(move_tank) => {
                match self
                    .game
                    .entities
                    .get_mut(move_tank.entity)
                    .and_then(|components| components.planet_position.as_mut())
                {
                    Some(planet_position) => {
                        // Snap to the authoritative position, then keep
                        // integrating with the new delta.
                        planet_position.value = move_tank.planet_position;
                        planet_position.delta = move_tank.velocity;
                        true
                    }
                    None => false,
                }
            }

            GameCommand::RotateTurret(rotate_turret) => {
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

            GameCommand::Charge(charge) => {
                // Only the local tank's charge is tracked on the replica;
                // it drives the charge bar and the aim preview.
                let my_tank = match self.my_tank {
                    Some(my_tank) if my_tank == charge.entity => my_tank,
                    _ => return false,
                };

                let time = self.game.time;
                let components = match self.game.entities.get_mut(my_tank) {
                    Some(components) => components,
                    None => return false,
                };

                if charge.fire {
                    if components.charging.is_none() {
                        return false;
                    }
                    components.charging = None;
                    true
                } else if let Some(charging) = components.charging.as_mut() {
                    charging.start_time = time;
                    false
                } else {
                    components.charging =
                        Some(shared::components::Charging { start_time: time });
                    true
                }
            }

            GameCommand::SpawnProjectile(spawn) => {
                let projectile = self
                    .game
                    .entities
                    .spawn_at(spawn.target, Prefab::Projectile);
                debug!("Spawn projectile {}", projectile);

                if let Some(components) = self.game.entities.get_mut(projectile) {
                    if let Some(position) = components.position.as_mut() {
                        position.value = spawn.position;
                    }
                    if let Some(velocity) = components.velocity.as_mut() {
                        velocity.value = spawn.velocity;
                    }
                    if let Some(mass) = components.mass.as_mut() {
                        mass.value = spawn.weapon.stats().projectile_mass;
                    }
                    if let Some(projectile_component) = components.projectile.as_mut() {
                        projectile_component.firing_entity = spawn.firing_entity;
                    }
                }
                true
            }

            GameCommand::DestroyEntity(destroy) => {
                // The server may destroy entities we already replaced; a
                // stale handle is not an error here.
                if self.game.entities.is_valid(destroy.target) {
                    self.game.entities.destroy(destroy.target);
                }
                true
            }

            GameCommand::SetHealth(set_health) => {
                match self
                    .game
                    .entities
                    .get_mut(set_health.target)
                    .and_then(|components| components.health.as_mut())
                {
                    Some(health) => {
                        health.value = set_health.health;
                        health.max = set_health.max;
                        true
                    }
                    None => false,
                }
            }

            GameCommand::PlaySfx(play_sfx) => {
                if play_sfx.sfx == Sfx::None {
                    return false;
                }
                self.sfx_events.push(play_sfx.sfx);
                true
            }

            GameCommand::SetPosition(set_position) => {
                match self
                    .game
                    .entities
                    .get_mut(set_position.target)
                    .and_then(|components| components.position.as_mut())
                {
                    Some(position) => {
                        position.value = set_position.position;
                        true
                    }
                    None => false,
                }
            }

            GameCommand::SwitchWeapon(switch_weapon) => {
                // The wire format carries no entity; the echo applies to the
                // local tank, matching what the server tracked for us.
                match self.my_tank.and_then(|my_tank| {
                    self.game
                        .entities
                        .get_mut(my_tank)
                        .and_then(|components| components.tank.as_mut())
                }) {
                    Some(tank) => {
                        tank.weapon = switch_weapon.weapon;
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Sound events queued since the last drain, for the audio layer.
    pub fn drain_sfx(&mut self) -> Vec<Sfx> {
        std::mem::take(&mut self.sfx_events)
    }

    /// Predicts the local tank's projectile path by force-firing in a
    /// cloned world and fast-forwarding it. Purely local; the authoritative
    /// state is untouched.
    pub fn simulate_projectile_movement(&self, num_ticks: usize) -> Vec<Vec2> {
        let mut positions = Vec::new();

        let my_tank = match self.my_tank {
            Some(my_tank) => my_tank,
            None => return positions,
        };

        let mut alternative_reality = self.game.clone();
        let projectiles = alternative_reality.fire(my_tank, true);

        if projectiles.len() != 1 {
            return positions;
        }

        let projectile = projectiles[0];
        for _ in 0..num_ticks {
            alternative_reality.tick(1.0);
            match alternative_reality
                .entities
                .get(projectile)
                .and_then(|components| components.position.as_ref())
            {
                Some(position) => positions.push(position.value),
                None => break,
            }
        }

        positions
    }

    /// Builds the data-only view the rendering layer consumes.
    pub fn snapshot(&self) -> RenderSnapshot {
        let mut snapshot = RenderSnapshot {
            background_color: self.game.background_color,
            world_size: self.game.size,
            time: self.game.time,
            planets: Vec::new(),
            tanks: Vec::new(),
            projectiles: Vec::new(),
        };

        self.game.entities.each(|entity, components| {
            if let (Some(planet), Some(position)) =
                (components.planet.as_ref(), components.position.as_ref())
            {
                snapshot.planets.push(PlanetView {
                    entity,
                    position: position.value,
                    radius: planet.radius,
                });
            }

            if let (Some(projectile), Some(position)) =
                (components.projectile.as_ref(), components.position.as_ref())
            {
                snapshot.projectiles.push(ProjectileView {
                    entity,
                    position: position.value,
                    radius: projectile.radius,
                });
            }
        });

        // Tanks need the full state for their world position.
        self.game.entities.each(|entity, components| {
            let tank = match components.tank.as_ref() {
                Some(tank) => tank,
                None => return,
            };
            let health = components.health.as_ref();
            let position = match self.game.tank_world_position(entity) {
                Some(position) => position,
                None => return,
            };

            snapshot.tanks.push(TankView {
                entity,
                position,
                turret_rotation: tank.turret_rotation,
                health: health.map(|h| h.value).unwrap_or(0.0),
                max_health: health.map(|h| h.max).unwrap_or(0.0),
                fuel: tank.fuel,
                weapon: tank.weapon,
                is_local: self.my_tank == Some(entity),
            });
        });

        snapshot
    }
}

/// Everything the renderer needs for one frame, with no engine types.
#[derive(Debug, Clone)]
pub struct RenderSnapshot {
    pub background_color: Color,
    pub world_size: Vec2,
    pub time: f32,
    pub planets: Vec<PlanetView>,
    pub tanks: Vec<TankView>,
    pub projectiles: Vec<ProjectileView>,
}

#[derive(Debug, Clone, Copy)]
pub struct PlanetView {
    pub entity: Entity,
    pub position: Vec2,
    pub radius: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct TankView {
    pub entity: Entity,
    pub position: Vec2,
    pub turret_rotation: f32,
    pub health: f32,
    pub max_health: f32,
    pub fuel: f32,
    pub weapon: shared::components::WeaponKind,
    pub is_local: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ProjectileView {
    pub entity: Entity,
    pub position: Vec2,
    pub radius: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::commands::{
        DestroyEntityCommand, MoveTankCommand, PlaySfxCommand, SetHealthCommand,
        SpawnProjectileCommand,
    };
    use shared::components::WeaponKind;

    fn replica_with_world() -> (ClientGameState, Entity, Entity) {
        let mut server_side = GameState::with_seed(11);
        server_side.size = Vec2::new(1000.0, 1000.0);

        let planet = server_side.entities.spawn(Prefab::Planet);
        {
            let components = server_side.entities.get_mut(planet).unwrap();
            components.position.as_mut().unwrap().value = Vec2::new(500.0, 500.0);
            components.mass.as_mut().unwrap().value = 20.0;
            let planet_component = components.planet.as_mut().unwrap();
            planet_component.initial_position = Vec2::new(500.0, 500.0);
            planet_component.radius = 100.0;
        }

        let tank = server_side.entities.spawn(Prefab::Tank);
        {
            let components = server_side.entities.get_mut(tank).unwrap();
            components.tank.as_mut().unwrap().planet = planet;
            *components.health.as_mut().unwrap() = shared::components::Health {
                value: 100.0,
                max: 100.0,
            };
        }

        // Bring the replica up through a real snapshot.
        let mut packet = Packet::new();
        server_side.serialize(&mut packet);
        packet.write_header();
        let mut packet = Packet::from_frame(packet.into_bytes());

        let mut replica = ClientGameState::new();
        assert!(replica.load_level(&mut packet));
        assert!(packet.is_valid_and_finished());
        replica.my_tank = Some(tank);

        (replica, planet, tank)
    }

    #[test]
    fn test_move_tank_snaps_to_authoritative_position() {
        let (mut replica, _, tank) = replica_with_world();

        let applied = replica.handle_command(&GameCommand::MoveTank(MoveTankCommand {
            entity: tank,
            planet_position: 42.0,
            velocity: -0.5,
        }));
        assert!(applied);

        let planet_position = replica
            .game
            .entities
            .get(tank)
            .unwrap()
            .planet_position
            .unwrap();
        assert_eq!(planet_position.value, 42.0);
        assert_eq!(planet_position.delta, -0.5);
    }

    #[test]
    fn test_spawn_projectile_replays_server_entity_id() {
        let (mut replica, _, tank) = replica_with_world();

        let server_chosen = Entity::from_bits(0x0070_0007);
        let applied =
            replica.handle_command(&GameCommand::SpawnProjectile(SpawnProjectileCommand {
                target: server_chosen,
                firing_entity: tank,
                position: Vec2::new(10.0, 20.0),
                velocity: Vec2::new(0.0, 5.0),
                weapon: WeaponKind::Missile,
            }));
        assert!(applied);

        let components = replica.game.entities.get(server_chosen).unwrap();
        assert_eq!(components.position.unwrap().value, Vec2::new(10.0, 20.0));
        assert_eq!(
            components.mass.unwrap().value,
            WeaponKind::Missile.stats().projectile_mass
        );
        assert_eq!(components.projectile.unwrap().firing_entity, tank);
    }

    #[test]
    fn test_destroy_tolerates_stale_handles() {
        let (mut replica, _, _) = replica_with_world();

        let stale = Entity::from_bits(0x00F0_1234);
        assert!(replica.handle_command(&GameCommand::DestroyEntity(DestroyEntityCommand {
            target: stale,
        })));
    }

    #[test]
    fn test_set_health_and_sfx() {
        let (mut replica, _, tank) = replica_with_world();

        assert!(replica.handle_command(&GameCommand::SetHealth(SetHealthCommand {
            target: tank,
            health: 55.0,
            max: 100.0,
        })));
        assert_eq!(
            replica.game.entities.get(tank).unwrap().health.unwrap().value,
            55.0
        );

        assert!(replica.handle_command(&GameCommand::PlaySfx(PlaySfxCommand {
            sfx: Sfx::TankExplosion,
        })));
        assert_eq!(replica.drain_sfx(), vec![Sfx::TankExplosion]);
        assert!(replica.drain_sfx().is_empty());
    }

    #[test]
    fn test_trajectory_preview_leaves_state_untouched() {
        let (replica, _, _) = replica_with_world();

        let entities_before = replica.game.entities.len();
        let path = replica.simulate_projectile_movement(30);

        assert!(!path.is_empty());
        assert_eq!(replica.game.entities.len(), entities_before);

        // Projectiles fall under gravity, so consecutive points differ.
        assert_ne!(path.first(), path.last());
    }

    #[test]
    fn test_snapshot_reflects_world() {
        let (replica, planet, tank) = replica_with_world();

        let snapshot = replica.snapshot();
        assert_eq!(snapshot.planets.len(), 1);
        assert_eq!(snapshot.planets[0].entity, planet);
        assert_eq!(snapshot.planets[0].radius, 100.0);

        assert_eq!(snapshot.tanks.len(), 1);
        assert_eq!(snapshot.tanks[0].entity, tank);
        assert!(snapshot.tanks[0].is_local);
        assert_eq!(snapshot.tanks[0].health, 100.0);
    }
}
