use strum::FromRepr;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
pub enum MsgKind {
    Connect = 0,
    Ack = 1,
    Shutdown = 2,

    RegisterCore = 3,
    CloneCore = 4,
    DeleteCore = 5,

    Join = 6,
    List = 7,
    ListRooms = 8,
    ListCores = 9,

    Event = 10,
    Sync = 11,

    RollbackStart = 12,
    RollbackEnd = 13,
}
