//! Component records attached to simulation entities, plus the weapon table.

use crate::entity::Entity;
use crate::vec2::Vec2;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    pub value: Vec2,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Velocity {
    pub value: Vec2,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Mass {
    pub value: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Health {
    pub value: f32,
    pub max: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Planet {
    pub initial_position: Vec2,
    pub radius: f32,
    pub orbital_velocity: f32,
}

impl Default for Planet {
    fn default() -> Self {
        Planet {
            initial_position: Vec2::ZERO,
            radius: 0.0,
            orbital_velocity: 0.001,
        }
    }
}

/// Maximum charge a fire hold can accumulate, in ticks.
pub const MAX_CHARGE: f32 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WeaponKind {
    Shotgun = 0,
    Machinegun = 1,
    Missile = 2,
    Mortar = 3,
}

impl WeaponKind {
    pub const COUNT: usize = 4;

    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Shotgun,
            1 => Self::Machinegun,
            2 => Self::Missile,
            3 => Self::Mortar,
            _ => return None,
        })
    }

    /// The next weapon in cycling order, wrapping around.
    pub fn next(self) -> Self {
        match self {
            Self::Shotgun => Self::Machinegun,
            Self::Machinegun => Self::Missile,
            Self::Missile => Self::Mortar,
            Self::Mortar => Self::Shotgun,
        }
    }

    pub fn stats(self) -> &'static Weapon {
        &WEAPONS[self as usize]
    }
}

/// Static per-weapon configuration. Cooldowns and lifetimes are in ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weapon {
    pub projectile_mass: f32,
    pub cooldown: f32,
    pub damage: f32,
    pub speed: f32,
    pub projectile_ttl: f32,
    pub spread: f32,
    pub speed_spread: f32,
    pub burst: u32,
    pub name: &'static str,
}

#[rustfmt::skip]
pub const WEAPONS: [Weapon; WeaponKind::COUNT] = [
    /* WEAPON TABLE
       mass     cooldown  damage   speed   ttl      spread  speed_spread  burst  name */
    Weapon { projectile_mass: 7.0,  cooldown: 60.0,  damage: 3.5,  speed: 25.0, projectile_ttl: 100.0, spread: 3.0, speed_spread: 1.0, burst: 10, name: "Shotgun" },
    Weapon { projectile_mass: 5.0,  cooldown: 4.5,   damage: 6.0,  speed: 25.0, projectile_ttl: 60.0,  spread: 6.0, speed_spread: 2.0, burst: 1,  name: "Machinegun" },
    Weapon { projectile_mass: 10.0, cooldown: 150.0, damage: 40.0, speed: 17.0, projectile_ttl: 300.0, spread: 0.0, speed_spread: 0.0, burst: 1,  name: "Missile launcher" },
    Weapon { projectile_mass: 12.0, cooldown: 270.0, damage: 50.0, speed: 3.0,  projectile_ttl: 400.0, spread: 0.0, speed_spread: 0.0, burst: 1,  name: "Mortar" },
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tank {
    pub turret_rotation: f32,
    pub target_turret_rotation: f32,
    pub flags: u32,
    pub planet: Entity,
    pub fuel: f32,
    pub weapon: WeaponKind,
    pub last_fire_time: f32,
}

impl Tank {
    pub const BASE_HEIGHT: f32 = 30.0;
    pub const TURRET_HEIGHT: f32 = 40.0;
    pub const MAX_FUEL: f32 = 1000.0;
    pub const ROTATE_TURRET_LEFT: u32 = 1 << 0;
    pub const ROTATE_TURRET_RIGHT: u32 = 1 << 1;
}

impl Default for Tank {
    fn default() -> Self {
        Tank {
            turret_rotation: 0.0,
            target_turret_rotation: 0.0,
            flags: 0,
            planet: Entity::NULL,
            fuel: Tank::MAX_FUEL,
            weapon: WeaponKind::Mortar,
            last_fire_time: 0.0,
        }
    }
}

/// Angular position of a tank on its planet's rim, in degrees, plus the
/// current movement delta driven by MOVE_TANK commands.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlanetPosition {
    pub delta: f32,
    pub value: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Charging {
    pub start_time: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projectile {
    pub firing_entity: Entity,
    pub impact_damage: f32,
    pub hit_radius: f32,
    pub radius: f32,
}

impl Default for Projectile {
    fn default() -> Self {
        Projectile {
            firing_entity: Entity::NULL,
            impact_damage: 0.0,
            hit_radius: 40.0,
            radius: 7.0,
        }
    }
}

/// One-shot trait: the next planet impact leaves the projectile alive
/// instead of destroying it. The bounce velocity response is still missing;
/// the trait only suppresses the destruction.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProjectileBounce;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeToLive {
    pub value: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetReplication {
    pub last_replication: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weapon_table_lookup() {
        assert_eq!(WeaponKind::Shotgun.stats().burst, 10);
        assert_eq!(WeaponKind::Machinegun.stats().cooldown, 4.5);
        assert_eq!(WeaponKind::Missile.stats().name, "Missile launcher");
        assert_eq!(WeaponKind::Mortar.stats().damage, 50.0);
    }

    #[test]
    fn test_weapon_cycling_wraps() {
        let mut kind = WeaponKind::Shotgun;
        for _ in 0..WeaponKind::COUNT {
            kind = kind.next();
        }
        assert_eq!(kind, WeaponKind::Shotgun);
    }

    #[test]
    fn test_tank_defaults() {
        let tank = Tank::default();
        assert_eq!(tank.fuel, Tank::MAX_FUEL);
        assert_eq!(tank.weapon, WeaponKind::Mortar);
        assert_eq!(tank.planet, Entity::NULL);
    }
}
