//! Shared tick/physics engine driven identically on server and replicas.
//!
//! Everything that moves without an explicit command (linear motion, orbit
//! motion, gravity, turret easing) runs through the same integration code on
//! both sides, so replicas only drift within floating-point noise. Anything
//! random (projectile spread, bounce rolls) happens on the server alone and
//! reaches replicas as explicit spawn commands.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::components::{Tank, MAX_CHARGE};
use crate::entity::{serialize_entities, Entity, EntityRegistry, Prefab};
use crate::packet::Packet;
use crate::vec2::Vec2;

pub type Color = [u8; 4];

const GRAVITATIONAL_CONSTANT: f32 = 10.0;

/// World state shared by the authoritative simulation and its replicas.
#[derive(Debug, Clone)]
pub struct GameState {
    pub entities: EntityRegistry,
    pub background_color: Color,
    pub size: Vec2,
    /// Simulation clock in ticks.
    pub time: f32,
    pub rng: StdRng,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    pub fn new() -> Self {
        GameState {
            entities: EntityRegistry::new(),
            background_color: [0, 0, 0, 255],
            size: Vec2::ZERO,
            time: 0.0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic variant for tests and tools.
    pub fn with_seed(seed: u64) -> Self {
        GameState {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new()
        }
    }

    pub fn sun_position(&self) -> Vec2 {
        self.size / 2.0
    }

    /// One full shared simulation step.
    pub fn tick(&mut self, dt: f32) {
        self.advance_clock(dt);
        self.integrate(dt);
    }

    pub fn advance_clock(&mut self, dt: f32) {
        self.time += dt;
    }

    /// Runs the shared systems in their fixed order.
    pub fn integrate(&mut self, dt: f32) {
        self.update_positions(dt);
        self.move_tanks(dt);
        self.ease_turrets(dt);
        self.apply_gravity();
        self.orbit_planets();
    }

    fn update_positions(&mut self, dt: f32) {
        self.entities.each_mut(|_, components| {
            if let (Some(position), Some(velocity)) =
                (components.position.as_mut(), components.velocity.as_ref())
            {
                position.value += velocity.value * dt;
            }
        });
    }

    fn move_tanks(&mut self, dt: f32) {
        let mut moving = Vec::new();
        self.entities.each(|entity, components| {
            if let (Some(tank), Some(planet_position)) =
                (components.tank.as_ref(), components.planet_position.as_ref())
            {
                if tank.fuel > 0.0 && planet_position.delta != 0.0 {
                    moving.push((entity, tank.planet));
                }
            }
        });

        for (entity, planet_entity) in moving {
            let radius = match self
                .entities
                .get(planet_entity)
                .and_then(|components| components.planet.as_ref())
            {
                Some(planet) => planet.radius,
                None => continue,
            };

            let circumference = radius * 2.0 * std::f32::consts::PI;

            if let Some(components) = self.entities.get_mut(entity) {
                if let (Some(tank), Some(planet_position)) =
                    (components.tank.as_mut(), components.planet_position.as_mut())
                {
                    planet_position.value += planet_position.delta * dt / circumference * 1000.0;
                    tank.fuel = (tank.fuel - dt).max(0.0);
                }
            }
        }
    }

    fn ease_turrets(&mut self, dt: f32) {
        self.entities.each_mut(|_, components| {
            let tank = match components.tank.as_mut() {
                Some(tank) => tank,
                None => return,
            };

            let dist = (tank.turret_rotation - tank.target_turret_rotation).abs();
            let mut d_rotation = 0.0;

            if tank.flags == 0 && dist >= 0.01 {
                // Ease toward the target along the shorter arc.
                if tank.turret_rotation < tank.target_turret_rotation {
                    d_rotation = if dist < 180.0 { dt } else { -dt };
                } else {
                    d_rotation = if dist < 180.0 { -dt } else { dt };
                }
            } else if tank.flags & Tank::ROTATE_TURRET_LEFT != 0 {
                d_rotation = dt;
            } else if tank.flags & Tank::ROTATE_TURRET_RIGHT != 0 {
                d_rotation = -dt;
            }

            tank.turret_rotation += d_rotation;
            if tank.turret_rotation < 0.0 {
                tank.turret_rotation += 360.0;
            }
            tank.turret_rotation %= 360.0;
        });
    }

    fn apply_gravity(&mut self) {
        let mut bodies = Vec::new();
        self.entities.each(|entity, components| {
            if let (Some(position), Some(mass)) =
                (components.position.as_ref(), components.mass.as_ref())
            {
                bodies.push((entity, position.value, mass.value));
            }
        });

        self.entities.each_mut(|entity, components| {
            let mass = match components.mass.as_ref() {
                Some(mass) => mass.value,
                None => return,
            };
            let position = match components.position.as_ref() {
                Some(position) => position.value,
                None => return,
            };
            let velocity = match components.velocity.as_mut() {
                Some(velocity) => velocity,
                None => return,
            };

            let mut force = Vec2::ZERO;
            for &(other, other_position, other_mass) in &bodies {
                if other == entity {
                    continue;
                }

                let diff = other_position - position;
                let dist = diff.length();
                if dist > f32::EPSILON {
                    force +=
                        diff / dist * (GRAVITATIONAL_CONSTANT * mass * other_mass / (dist * dist));
                }
            }

            velocity.value += force;
        });
    }

    fn orbit_planets(&mut self) {
        // Closed-form rotation around the sun: exact for any tick partition,
        // so server and replicas cannot drift here.
        let sun = self.sun_position();
        let time = self.time;

        self.entities.each_mut(|_, components| {
            if let (Some(planet), Some(position)) =
                (components.planet.as_ref(), components.position.as_mut())
            {
                position.value =
                    (planet.initial_position - sun).rotate(time * planet.orbital_velocity) + sun;
            }
        });
    }

    /// World position of a tank sitting on its planet's rim.
    pub fn tank_world_position(&self, entity: Entity) -> Option<Vec2> {
        let components = self.entities.get(entity)?;
        let tank = components.tank.as_ref()?;
        let planet_position = components.planet_position.as_ref()?;

        let planet_components = self.entities.get(tank.planet)?;
        let planet = planet_components.planet.as_ref()?;
        let planet_pos = planet_components.position.as_ref()?;

        let reach = planet.radius + Tank::BASE_HEIGHT / 2.0;
        let angle = planet_position.value.to_radians();

        Some(planet_pos.value + Vec2::new(reach * angle.cos(), reach * angle.sin()))
    }

    /// Spawns this tank's projectiles for one fire event.
    ///
    /// Charge is the capped hold duration; with `force` a full release is
    /// assumed and the cooldown gate is skipped (used by what-if previews).
    /// Returns the spawned entities, empty if the tank cannot fire.
    pub fn fire(&mut self, firing_tank: Entity, force: bool) -> Vec<Entity> {
        let mut spawned = Vec::new();

        let (weapon_kind, turret_rotation, charge) = {
            let components = match self.entities.get(firing_tank) {
                Some(components) => components,
                None => return spawned,
            };
            let tank = match components.tank.as_ref() {
                Some(tank) => tank,
                None => return spawned,
            };
            let weapon = tank.weapon.stats();

            let charge = match components.charging.as_ref() {
                Some(charging) => (self.time - charging.start_time).min(MAX_CHARGE),
                None if force => 1.0,
                None => return spawned,
            };

            if tank.last_fire_time + weapon.cooldown > self.time && !force {
                return spawned;
            }

            (tank.weapon, tank.turret_rotation, charge)
        };

        let position = match self.tank_world_position(firing_tank) {
            Some(position) => position,
            None => return spawned,
        };

        if let Some(tank) = self
            .entities
            .get_mut(firing_tank)
            .and_then(|components| components.tank.as_mut())
        {
            tank.last_fire_time = self.time;
        }

        let weapon = weapon_kind.stats();

        for _ in 0..weapon.burst {
            let spread = self.rng.gen_range(-weapon.spread..=weapon.spread);
            let direction = Vec2::new(0.0, 1.0).rotate(-(turret_rotation + spread).to_radians());
            let bounces = self.rng.gen_range(0.0..1.0f32) >= 0.95;
            let speed_jitter = self
                .rng
                .gen_range(-weapon.speed_spread..=weapon.speed_spread);

            let velocity =
                direction * ((charge / MAX_CHARGE + 0.3) / 1.3) * (weapon.speed + speed_jitter);

            let projectile = self.entities.spawn(Prefab::Projectile);
            if let Some(components) = self.entities.get_mut(projectile) {
                if let Some(position_component) = components.position.as_mut() {
                    position_component.value = position;
                }
                if let Some(velocity_component) = components.velocity.as_mut() {
                    velocity_component.value = velocity;
                }
                if let Some(mass) = components.mass.as_mut() {
                    mass.value = weapon.projectile_mass;
                }
                if let Some(ttl) = components.ttl.as_mut() {
                    ttl.value = weapon.projectile_ttl;
                }
                if let Some(projectile_component) = components.projectile.as_mut() {
                    projectile_component.firing_entity = firing_tank;
                    projectile_component.impact_damage = weapon.damage;
                }
                if bounces {
                    components.bounce = Some(Default::default());
                }
            }

            spawned.push(projectile);
        }

        spawned
    }

    /// Writes the full world snapshot used by LOAD_LEVEL.
    pub fn serialize(&self, packet: &mut Packet) {
        for channel in self.background_color {
            packet.write_u8(channel);
        }
        packet.write_f32(self.size.x);
        packet.write_f32(self.size.y);
        serialize_entities(&self.entities, packet);
    }

    /// Loads the full world snapshot. Returns false on malformed input.
    pub fn deserialize(&mut self, packet: &mut Packet) -> bool {
        for channel in self.background_color.iter_mut() {
            match packet.read_u8() {
                Some(value) => *channel = value,
                None => return false,
            }
        }

        let (x, y) = match (packet.read_f32(), packet.read_f32()) {
            (Some(x), Some(y)) => (x, y),
            _ => return false,
        };
        self.size = Vec2::new(x, y);

        crate::entity::deserialize_entities(&mut self.entities, packet)
    }
}
