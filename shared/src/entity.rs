//! Generation-counted entity handles and the component registry.
//!
//! An [`Entity`] is a 32-bit handle packing a slot index and a generation
//! counter; destroying an entity bumps its slot generation, so stale handles
//! fail validation instead of aliasing a recycled slot. Components live in a
//! struct of optionals per slot, which keeps cloning for what-if reruns and
//! full-registry snapshots trivial.

use log::info;

use crate::components::{
    Charging, Health, Mass, NetReplication, Planet, PlanetPosition, Position, Projectile,
    ProjectileBounce, Tank, TimeToLive, Velocity, WeaponKind,
};
use crate::packet::Packet;
use crate::vec2::Vec2;

const INDEX_BITS: u32 = 20;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u32 = (1 << (32 - INDEX_BITS)) - 1;

/// Opaque versioned entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entity(u32);

impl Entity {
    /// Handle that never validates against any registry.
    pub const NULL: Entity = Entity(u32::MAX);

    fn new(index: u32, generation: u32) -> Self {
        debug_assert!(index <= INDEX_MASK);
        Entity((generation & GENERATION_MASK) << INDEX_BITS | index)
    }

    pub fn from_bits(bits: u32) -> Self {
        Entity(bits)
    }

    pub fn to_bits(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }

    fn generation(self) -> u32 {
        self.0 >> INDEX_BITS
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

/// All components an entity may carry.
#[derive(Debug, Clone, Default)]
pub struct ComponentSet {
    pub position: Option<Position>,
    pub velocity: Option<Velocity>,
    pub mass: Option<Mass>,
    pub health: Option<Health>,
    pub planet: Option<Planet>,
    pub tank: Option<Tank>,
    pub planet_position: Option<PlanetPosition>,
    pub charging: Option<Charging>,
    pub projectile: Option<Projectile>,
    pub bounce: Option<ProjectileBounce>,
    pub ttl: Option<TimeToLive>,
    pub replication: Option<NetReplication>,
}

/// The three legal component shapes at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefab {
    Planet,
    Tank,
    Projectile,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u32,
    alive: bool,
    components: ComponentSet,
}

#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn create(&mut self) -> Entity {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.alive = true;
            slot.components = ComponentSet::default();
            Entity::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                alive: true,
                components: ComponentSet::default(),
            });
            Entity::new(index, 0)
        }
    }

    /// Creates a slot at a caller-chosen handle, destroying whatever lives
    /// there. Used when replaying server-chosen entity ids on a replica.
    fn create_at(&mut self, entity: Entity) -> Entity {
        let index = entity.index();

        if index >= self.slots.len() {
            for filler in self.slots.len()..=index {
                self.slots.push(Slot::default());
                if filler != index {
                    self.free.push(filler as u32);
                }
            }
        } else if self.slots[index].alive {
            info!("Recreating live entity {}", entity);
        } else {
            self.free.retain(|&free_index| free_index as usize != index);
        }

        let slot = &mut self.slots[index];
        slot.generation = entity.generation();
        slot.alive = true;
        slot.components = ComponentSet::default();

        entity
    }

    /// Creates an entity with one of the prefab component shapes.
    pub fn spawn(&mut self, prefab: Prefab) -> Entity {
        let entity = self.create();
        self.apply_prefab(entity, prefab);
        entity
    }

    /// Like [`EntityRegistry::spawn`], but at a specific recycled handle.
    pub fn spawn_at(&mut self, entity: Entity, prefab: Prefab) -> Entity {
        let entity = self.create_at(entity);
        self.apply_prefab(entity, prefab);
        entity
    }

    fn apply_prefab(&mut self, entity: Entity, prefab: Prefab) {
        let components = &mut self.slots[entity.index()].components;

        match prefab {
            Prefab::Planet => {
                components.planet = Some(Planet::default());
                components.position = Some(Position::default());
                components.mass = Some(Mass::default());
                components.replication = Some(NetReplication::default());
            }
            Prefab::Tank => {
                components.tank = Some(Tank::default());
                components.planet_position = Some(PlanetPosition::default());
                components.health = Some(Health::default());
                components.replication = Some(NetReplication::default());
            }
            Prefab::Projectile => {
                components.position = Some(Position::default());
                components.velocity = Some(Velocity::default());
                components.mass = Some(Mass::default());
                components.projectile = Some(Projectile::default());
                components.ttl = Some(TimeToLive::default());
                components.replication = Some(NetReplication::default());
            }
        }
    }

    pub fn destroy(&mut self, entity: Entity) -> bool {
        if !self.is_valid(entity) {
            return false;
        }

        let index = entity.index();
        let slot = &mut self.slots[index];
        slot.alive = false;
        slot.components = ComponentSet::default();
        slot.generation = (slot.generation + 1) & GENERATION_MASK;
        self.free.push(index as u32);

        true
    }

    pub fn is_valid(&self, entity: Entity) -> bool {
        let index = entity.index();
        index < self.slots.len()
            && self.slots[index].alive
            && self.slots[index].generation == entity.generation()
    }

    pub fn get(&self, entity: Entity) -> Option<&ComponentSet> {
        if self.is_valid(entity) {
            Some(&self.slots[entity.index()].components)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut ComponentSet> {
        if self.is_valid(entity) {
            Some(&mut self.slots[entity.index()].components)
        } else {
            None
        }
    }

    /// All live entities in slot order.
    pub fn entities(&self) -> Vec<Entity> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.alive)
            .map(|(index, slot)| Entity::new(index as u32, slot.generation))
            .collect()
    }

    pub fn each(&self, mut f: impl FnMut(Entity, &ComponentSet)) {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.alive {
                f(Entity::new(index as u32, slot.generation), &slot.components);
            }
        }
    }

    pub fn each_mut(&mut self, mut f: impl FnMut(Entity, &mut ComponentSet)) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.alive {
                f(
                    Entity::new(index as u32, slot.generation),
                    &mut slot.components,
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.alive).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

// Snapshot layout: entity count, then per entity its handle bits, a component
// presence bitmask and each present component's fields in mask-bit order.
// TimeToLive and NetReplication are server-side bookkeeping and stay out of
// the snapshot; projectile expiry always arrives as an explicit command.

const SNAP_POSITION: u16 = 1 << 0;
const SNAP_VELOCITY: u16 = 1 << 1;
const SNAP_MASS: u16 = 1 << 2;
const SNAP_HEALTH: u16 = 1 << 3;
const SNAP_PLANET: u16 = 1 << 4;
const SNAP_TANK: u16 = 1 << 5;
const SNAP_PLANET_POSITION: u16 = 1 << 6;
const SNAP_CHARGING: u16 = 1 << 7;
const SNAP_PROJECTILE: u16 = 1 << 8;
const SNAP_BOUNCE: u16 = 1 << 9;

fn write_vec2(packet: &mut Packet, value: Vec2) {
    packet.write_f32(value.x);
    packet.write_f32(value.y);
}

fn read_vec2(packet: &mut Packet) -> Option<Vec2> {
    Some(Vec2::new(packet.read_f32()?, packet.read_f32()?))
}

/// Serializes every live entity and its replicated components.
pub fn serialize_entities(registry: &EntityRegistry, packet: &mut Packet) {
    let entities = registry.entities();
    packet.write_u32(entities.len() as u32);

    for entity in entities {
        let components = match registry.get(entity) {
            Some(components) => components,
            None => continue,
        };

        let mut mask = 0u16;
        mask |= components.position.is_some() as u16 * SNAP_POSITION;
        mask |= components.velocity.is_some() as u16 * SNAP_VELOCITY;
        mask |= components.mass.is_some() as u16 * SNAP_MASS;
        mask |= components.health.is_some() as u16 * SNAP_HEALTH;
        mask |= components.planet.is_some() as u16 * SNAP_PLANET;
        mask |= components.tank.is_some() as u16 * SNAP_TANK;
        mask |= components.planet_position.is_some() as u16 * SNAP_PLANET_POSITION;
        mask |= components.charging.is_some() as u16 * SNAP_CHARGING;
        mask |= components.projectile.is_some() as u16 * SNAP_PROJECTILE;
        mask |= components.bounce.is_some() as u16 * SNAP_BOUNCE;

        packet.write_u32(entity.to_bits());
        packet.write_u16(mask);

        if let Some(position) = &components.position {
            write_vec2(packet, position.value);
        }
        if let Some(velocity) = &components.velocity {
            write_vec2(packet, velocity.value);
        }
        if let Some(mass) = &components.mass {
            packet.write_f32(mass.value);
        }
        if let Some(health) = &components.health {
            packet.write_f32(health.value);
            packet.write_f32(health.max);
        }
        if let Some(planet) = &components.planet {
            write_vec2(packet, planet.initial_position);
            packet.write_f32(planet.radius);
            packet.write_f32(planet.orbital_velocity);
        }
        if let Some(tank) = &components.tank {
            packet.write_f32(tank.turret_rotation);
            packet.write_f32(tank.target_turret_rotation);
            packet.write_u32(tank.flags);
            packet.write_u32(tank.planet.to_bits());
            packet.write_f32(tank.fuel);
            packet.write_u8(tank.weapon as u8);
            packet.write_f32(tank.last_fire_time);
        }
        if let Some(planet_position) = &components.planet_position {
            packet.write_f32(planet_position.delta);
            packet.write_f32(planet_position.value);
        }
        if let Some(charging) = &components.charging {
            packet.write_f32(charging.start_time);
        }
        if let Some(projectile) = &components.projectile {
            packet.write_u32(projectile.firing_entity.to_bits());
            packet.write_f32(projectile.impact_damage);
            packet.write_f32(projectile.hit_radius);
            packet.write_f32(projectile.radius);
        }
    }
}

/// Rebuilds a registry from a snapshot. Returns false on malformed input.
pub fn deserialize_entities(registry: &mut EntityRegistry, packet: &mut Packet) -> bool {
    registry.clear();

    let count = match packet.read_u32() {
        Some(count) => count,
        None => return false,
    };

    for _ in 0..count {
        let (bits, mask) = match (packet.read_u32(), packet.read_u16()) {
            (Some(bits), Some(mask)) => (bits, mask),
            _ => return false,
        };

        let entity = registry.create_at(Entity::from_bits(bits));
        let read = (|| -> Option<ComponentSet> {
            let mut components = ComponentSet::default();

            if mask & SNAP_POSITION != 0 {
                components.position = Some(Position {
                    value: read_vec2(packet)?,
                });
            }
            if mask & SNAP_VELOCITY != 0 {
                components.velocity = Some(Velocity {
                    value: read_vec2(packet)?,
                });
            }
            if mask & SNAP_MASS != 0 {
                components.mass = Some(Mass {
                    value: packet.read_f32()?,
                });
            }
            if mask & SNAP_HEALTH != 0 {
                components.health = Some(Health {
                    value: packet.read_f32()?,
                    max: packet.read_f32()?,
                });
            }
            if mask & SNAP_PLANET != 0 {
                components.planet = Some(Planet {
                    initial_position: read_vec2(packet)?,
                    radius: packet.read_f32()?,
                    orbital_velocity: packet.read_f32()?,
                });
            }
            if mask & SNAP_TANK != 0 {
                components.tank = Some(Tank {
                    turret_rotation: packet.read_f32()?,
                    target_turret_rotation: packet.read_f32()?,
                    flags: packet.read_u32()?,
                    planet: Entity::from_bits(packet.read_u32()?),
                    fuel: packet.read_f32()?,
                    weapon: WeaponKind::from_u8(packet.read_u8()?)?,
                    last_fire_time: packet.read_f32()?,
                });
            }
            if mask & SNAP_PLANET_POSITION != 0 {
                components.planet_position = Some(PlanetPosition {
                    delta: packet.read_f32()?,
                    value: packet.read_f32()?,
                });
            }
            if mask & SNAP_CHARGING != 0 {
                components.charging = Some(Charging {
                    start_time: packet.read_f32()?,
                });
            }
            if mask & SNAP_PROJECTILE != 0 {
                components.projectile = Some(Projectile {
                    firing_entity: Entity::from_bits(packet.read_u32()?),
                    impact_damage: packet.read_f32()?,
                    hit_radius: packet.read_f32()?,
                    radius: packet.read_f32()?,
                });
            }
            if mask & SNAP_BOUNCE != 0 {
                components.bounce = Some(ProjectileBounce);
            }

            Some(components)
        })();

        match read {
            Some(components) => {
                if let Some(slot) = registry.get_mut(entity) {
                    *slot = components;
                }
            }
            None => return false,
        }
    }

    true
}
