//! Game commands: tagged, serializable mutation requests.
//!
//! Commands are the only way simulation state changes propagate over the
//! wire after the initial snapshot. Client-authored commands are requests
//! the server validates; server-authored commands are authoritative and
//! broadcast verbatim to every session member.

use crate::components::WeaponKind;
use crate::entity::Entity;
use crate::packet::Packet;
use crate::vec2::Vec2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Sfx {
    None = 0,
    TankExplosion = 1,
    TankFire = 2,
}

impl Sfx {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::None,
            1 => Self::TankExplosion,
            2 => Self::TankFire,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveTankCommand {
    pub entity: Entity,
    /// Authoritative angular position, echoed by the server so replicas can
    /// snap to it before applying the new movement delta.
    pub planet_position: f32,
    pub velocity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotateTurretCommand {
    pub is_absolute: bool,
    pub entity: Entity,
    pub target_rotation: f32,
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargeCommand {
    pub entity: Entity,
    /// false starts charging (fire pressed), true releases (fire let go).
    pub fire: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnProjectileCommand {
    pub target: Entity,
    pub firing_entity: Entity,
    pub position: Vec2,
    pub velocity: Vec2,
    pub weapon: WeaponKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DestroyEntityCommand {
    pub target: Entity,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetHealthCommand {
    pub target: Entity,
    pub health: f32,
    pub max: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaySfxCommand {
    pub sfx: Sfx,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetPositionCommand {
    pub target: Entity,
    pub position: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchWeaponCommand {
    pub weapon: WeaponKind,
}

/// The closed set of mutation intents, dispatched exhaustively.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GameCommand {
    MoveTank(MoveTankCommand),
    RotateTurret(RotateTurretCommand),
    Charge(ChargeCommand),
    SpawnProjectile(SpawnProjectileCommand),
    DestroyEntity(DestroyEntityCommand),
    SetHealth(SetHealthCommand),
    PlaySfx(PlaySfxCommand),
    SetPosition(SetPositionCommand),
    SwitchWeapon(SwitchWeaponCommand),
}

const TAG_MOVE_TANK: u8 = 1;
const TAG_ROTATE_TURRET: u8 = 2;
const TAG_CHARGE: u8 = 3;
const TAG_SPAWN_PROJECTILE: u8 = 4;
const TAG_DESTROY_ENTITY: u8 = 5;
const TAG_SET_HEALTH: u8 = 6;
const TAG_PLAY_SFX: u8 = 7;
const TAG_SET_POSITION: u8 = 8;
const TAG_SWITCH_WEAPON: u8 = 9;

fn write_vec2(packet: &mut Packet, value: Vec2) {
    packet.write_f32(value.x);
    packet.write_f32(value.y);
}

fn read_vec2(packet: &mut Packet) -> Option<Vec2> {
    Some(Vec2::new(packet.read_f32()?, packet.read_f32()?))
}

impl GameCommand {
    /// Writes the command tag followed by the command's own layout.
    pub fn serialize(&self, packet: &mut Packet) {
        match self {
            GameCommand::MoveTank(command) => {
                packet.write_u8(TAG_MOVE_TANK);
                packet.write_u32(command.entity.to_bits());
                packet.write_f32(command.planet_position);
                packet.write_f32(command.velocity);
            }
            GameCommand::RotateTurret(command) => {
                packet.write_u8(TAG_ROTATE_TURRET);
                packet.write_bool(command.is_absolute);
                packet.write_u32(command.entity.to_bits());
                packet.write_f32(command.target_rotation);
                packet.write_u32(command.flags);
            }
            GameCommand::Charge(command) => {
                packet.write_u8(TAG_CHARGE);
                packet.write_u32(command.entity.to_bits());
                packet.write_bool(command.fire);
            }
            GameCommand::SpawnProjectile(command) => {
                packet.write_u8(TAG_SPAWN_PROJECTILE);
                packet.write_u32(command.target.to_bits());
                packet.write_u32(command.firing_entity.to_bits());
                write_vec2(packet, command.position);
                write_vec2(packet, command.velocity);
                packet.write_u8(command.weapon as u8);
            }
            GameCommand::DestroyEntity(command) => {
                packet.write_u8(TAG_DESTROY_ENTITY);
                packet.write_u32(command.target.to_bits());
            }
            GameCommand::SetHealth(command) => {
                packet.write_u8(TAG_SET_HEALTH);
                packet.write_u32(command.target.to_bits());
                packet.write_f32(command.health);
                packet.write_f32(command.max);
            }
            GameCommand::PlaySfx(command) => {
                packet.write_u8(TAG_PLAY_SFX);
                packet.write_u8(command.sfx as u8);
            }
            GameCommand::SetPosition(command) => {
                packet.write_u8(TAG_SET_POSITION);
                packet.write_u32(command.target.to_bits());
                write_vec2(packet, command.position);
            }
            GameCommand::SwitchWeapon(command) => {
                packet.write_u8(TAG_SWITCH_WEAPON);
                packet.write_u8(command.weapon as u8);
            }
        }
    }

    /// Reads one command starting at its tag. Unknown tags and truncated
    /// layouts yield None; the packet is left invalid or short-read and the
    /// caller reports a protocol error.
    pub fn deserialize(packet: &mut Packet) -> Option<GameCommand> {
        let command = match packet.read_u8()? {
            TAG_MOVE_TANK => GameCommand::MoveTank(MoveTankCommand {
                entity: Entity::from_bits(packet.read_u32()?),
                planet_position: packet.read_f32()?,
                velocity: packet.read_f32()?,
            }),
            TAG_ROTATE_TURRET => GameCommand::RotateTurret(RotateTurretCommand {
                is_absolute: packet.read_bool()?,
                entity: Entity::from_bits(packet.read_u32()?),
                target_rotation: packet.read_f32()?,
                flags: packet.read_u32()?,
            }),
            TAG_CHARGE => GameCommand::Charge(ChargeCommand {
                entity: Entity::from_bits(packet.read_u32()?),
                fire: packet.read_bool()?,
            }),
            TAG_SPAWN_PROJECTILE => GameCommand::SpawnProjectile(SpawnProjectileCommand {
                target: Entity::from_bits(packet.read_u32()?),
                firing_entity: Entity::from_bits(packet.read_u32()?),
                position: read_vec2(packet)?,
                velocity: read_vec2(packet)?,
                weapon: WeaponKind::from_u8(packet.read_u8()?)?,
            }),
            TAG_DESTROY_ENTITY => GameCommand::DestroyEntity(DestroyEntityCommand {
                target: Entity::from_bits(packet.read_u32()?),
            }),
            TAG_SET_HEALTH => GameCommand::SetHealth(SetHealthCommand {
                target: Entity::from_bits(packet.read_u32()?),
                health: packet.read_f32()?,
                max: packet.read_f32()?,
            }),
            TAG_PLAY_SFX => GameCommand::PlaySfx(PlaySfxCommand {
                sfx: Sfx::from_u8(packet.read_u8()?)?,
            }),
            TAG_SET_POSITION => GameCommand::SetPosition(SetPositionCommand {
                target: Entity::from_bits(packet.read_u32()?),
                position: read_vec2(packet)?,
            }),
            TAG_SWITCH_WEAPON => GameCommand::SwitchWeapon(SwitchWeaponCommand {
                weapon: WeaponKind::from_u8(packet.read_u8()?)?,
            }),
            _ => return None,
        };

        Some(command)
    }
}

impl From<MoveTankCommand> for GameCommand {
    fn from(command: MoveTankCommand) -> Self {
        GameCommand::MoveTank(command)
    }
}

impl From<RotateTurretCommand> for GameCommand {
    fn from(command: RotateTurretCommand) -> Self {
        GameCommand::RotateTurret(command)
    }
}

impl From<ChargeCommand> for GameCommand {
    fn from(command: ChargeCommand) -> Self {
        GameCommand::Charge(command)
    }
}

impl From<SpawnProjectileCommand> for GameCommand {
    fn from(command: SpawnProjectileCommand) -> Self {
        GameCommand::SpawnProjectile(command)
    }
}

impl From<DestroyEntityCommand> for GameCommand {
    fn from(command: DestroyEntityCommand) -> Self {
        GameCommand::DestroyEntity(command)
    }
}

impl From<SetHealthCommand> for GameCommand {
    fn from(command: SetHealthCommand) -> Self {
        GameCommand::SetHealth(command)
    }
}

impl From<PlaySfxCommand> for GameCommand {
    fn from(command: PlaySfxCommand) -> Self {
        GameCommand::PlaySfx(command)
    }
}

impl From<SetPositionCommand> for GameCommand {
    fn from(command: SetPositionCommand) -> Self {
        GameCommand::SetPosition(command)
    }
}

impl From<SwitchWeaponCommand> for GameCommand {
    fn from(command: SwitchWeaponCommand) -> Self {
        GameCommand::SwitchWeapon(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(command: GameCommand) {
        let mut packet = Packet::new();
        command.serialize(&mut packet);
        packet.write_header();

        let mut packet = Packet::from_frame(packet.into_bytes());
        let out = GameCommand::deserialize(&mut packet).unwrap();
        assert_eq!(out, command);
        assert!(packet.is_valid_and_finished());
    }

    #[test]
    fn test_command_roundtrips() {
        let entity = Entity::from_bits(7);
        let other = Entity::from_bits(12);

        roundtrip(GameCommand::MoveTank(MoveTankCommand {
            entity,
            planet_position: 12.5,
            velocity: -0.5,
        }));
        roundtrip(GameCommand::RotateTurret(RotateTurretCommand {
            is_absolute: true,
            entity,
            target_rotation: 271.0,
            flags: 0,
        }));
        roundtrip(GameCommand::Charge(ChargeCommand { entity, fire: true }));
        roundtrip(GameCommand::SpawnProjectile(SpawnProjectileCommand {
            target: other,
            firing_entity: entity,
            position: Vec2::new(100.0, 200.0),
            velocity: Vec2::new(0.0, 17.0),
            weapon: WeaponKind::Missile,
        }));
        roundtrip(GameCommand::DestroyEntity(DestroyEntityCommand {
            target: other,
        }));
        roundtrip(GameCommand::SetHealth(SetHealthCommand {
            target: entity,
            health: 60.0,
            max: 100.0,
        }));
        roundtrip(GameCommand::PlaySfx(PlaySfxCommand {
            sfx: Sfx::TankExplosion,
        }));
        roundtrip(GameCommand::SetPosition(SetPositionCommand {
            target: entity,
            position: Vec2::new(-3.0, 4.0),
        }));
        roundtrip(GameCommand::SwitchWeapon(SwitchWeaponCommand {
            weapon: WeaponKind::Machinegun,
        }));
    }

    #[test]
    fn test_unknown_command_tag_fails() {
        let mut packet = Packet::new();
        packet.write_u8(200);
        packet.write_header();

        let mut packet = Packet::from_frame(packet.into_bytes());
        assert!(GameCommand::deserialize(&mut packet).is_none());
    }

    #[test]
    fn test_truncated_command_fails() {
        let mut packet = Packet::new();
        packet.write_u8(TAG_MOVE_TANK);
        packet.write_u32(1);
        // planet_position and velocity are missing.
        packet.write_header();

        let mut packet = Packet::from_frame(packet.into_bytes());
        assert!(GameCommand::deserialize(&mut packet).is_none());
        assert!(!packet.is_valid_and_finished());
    }
}
