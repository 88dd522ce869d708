use dn_core::DnError;

/// Operation carried by a packet.
///
/// Unassigned byte values decode to `Unknown` so that a handler can answer
/// them with an argument-mismatch reply instead of dropping the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    CreateExtent,
    MarkDelete,
    Write,
    Read,
    StreamRead,
    GetAllWaterMark,
    NotifyExtentRepair,
    ExtentRepairRead,

    // Master commands (0x60-0x6F)
    CreateDataPartition,
    DeleteDataPartition,
    LoadDataPartition,
    DataNodeHeartbeat,
    OfflineDataPartition,

    /// Success marker, also used as the opcode of streamed read responses
    Ok,
    Unknown(u8),
}

impl Opcode {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::CreateExtent => 0x01,
            Self::MarkDelete => 0x02,
            Self::Write => 0x03,
            Self::Read => 0x04,
            Self::StreamRead => 0x05,
            Self::GetAllWaterMark => 0x07,
            Self::NotifyExtentRepair => 0x08,
            Self::ExtentRepairRead => 0x09,
            Self::CreateDataPartition => 0x60,
            Self::DeleteDataPartition => 0x61,
            Self::LoadDataPartition => 0x62,
            Self::DataNodeHeartbeat => 0x63,
            Self::OfflineDataPartition => 0x64,
            Self::Ok => 0xF0,
            Self::Unknown(code) => code,
        }
    }

    /// Stable name used in log ids and metric keys.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CreateExtent => "OpCreateExtent",
            Self::MarkDelete => "OpMarkDelete",
            Self::Write => "OpWrite",
            Self::Read => "OpRead",
            Self::StreamRead => "OpStreamRead",
            Self::GetAllWaterMark => "OpGetAllWaterMark",
            Self::NotifyExtentRepair => "OpNotifyExtentRepair",
            Self::ExtentRepairRead => "OpExtentRepairRead",
            Self::CreateDataPartition => "OpCreateDataPartition",
            Self::DeleteDataPartition => "OpDeleteDataPartition",
            Self::LoadDataPartition => "OpLoadDataPartition",
            Self::DataNodeHeartbeat => "OpDataNodeHeartbeat",
            Self::OfflineDataPartition => "OpOfflineDataPartition",
            Self::Ok => "OpOk",
            Self::Unknown(_) => "OpUnknown",
        }
    }

    /// Read-class requests: their payload is produced by the handler, so an
    /// unexecuted request carries no payload bytes on the wire.
    #[inline]
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::StreamRead | Self::Read | Self::ExtentRepairRead)
    }

    /// Administrative commands from the master; never forwarded to followers.
    #[inline]
    #[must_use]
    pub const fn is_master_command(self) -> bool {
        matches!(
            self,
            Self::DataNodeHeartbeat
                | Self::LoadDataPartition
                | Self::CreateDataPartition
                | Self::DeleteDataPartition
                | Self::OfflineDataPartition
        )
    }

    /// Answered with a sequence of frames rather than one reply. A pooled
    /// follower connection cannot be handed back after such an exchange, so
    /// these packets are never relayed.
    #[inline]
    #[must_use]
    pub const fn streams_reply(self) -> bool {
        matches!(self, Self::StreamRead)
    }
}

impl From<u8> for Opcode {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::CreateExtent,
            0x02 => Self::MarkDelete,
            0x03 => Self::Write,
            0x04 => Self::Read,
            0x05 => Self::StreamRead,
            0x07 => Self::GetAllWaterMark,
            0x08 => Self::NotifyExtentRepair,
            0x09 => Self::ExtentRepairRead,
            0x60 => Self::CreateDataPartition,
            0x61 => Self::DeleteDataPartition,
            0x62 => Self::LoadDataPartition,
            0x63 => Self::DataNodeHeartbeat,
            0x64 => Self::OfflineDataPartition,
            0xF0 => Self::Ok,
            other => Self::Unknown(other),
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "OpUnknown({code:#x})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Closed set of outcomes a packet can carry.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// Set before a request has been processed
    Unexecuted = 0x00,
    Ok = 0xF0,
    IntraGroupNetErr = 0xF3,
    ArgMismatch = 0xF4,
    NotExist = 0xF5,
    DiskNoSpace = 0xF6,
    DiskErr = 0xF7,
    Again = 0xF9,
    NotLeader = 0xFC,
}

impl ResultCode {
    #[inline]
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Disk faults never reach the wire as disk faults; they are reported as
    /// intra-group network faults so the chain layer retries them uniformly.
    #[inline]
    #[must_use]
    pub const fn for_wire(self) -> Self {
        match self {
            Self::DiskNoSpace | Self::DiskErr => Self::IntraGroupNetErr,
            other => other,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unexecuted => "Unexecuted",
            Self::Ok => "Ok",
            Self::IntraGroupNetErr => "IntraGroupNetErr",
            Self::ArgMismatch => "ArgMismatchErr",
            Self::NotExist => "NotExistErr",
            Self::DiskNoSpace => "DiskNoSpaceErr",
            Self::DiskErr => "DiskErr",
            Self::Again => "Again",
            Self::NotLeader => "NotLeaderErr",
        }
    }
}

impl TryFrom<u8> for ResultCode {
    type Error = DnError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => Self::Unexecuted,
            0xF0 => Self::Ok,
            0xF3 => Self::IntraGroupNetErr,
            0xF4 => Self::ArgMismatch,
            0xF5 => Self::NotExist,
            0xF6 => Self::DiskNoSpace,
            0xF7 => Self::DiskErr,
            0xF9 => Self::Again,
            0xFC => Self::NotLeader,
            other => {
                return Err(DnError::Protocol(format!(
                    "unknown result code {other:#x}"
                )));
            },
        })
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How the storage collaborator addresses the extent.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtentMode {
    #[default]
    Normal = 0,
    Tiny = 1,
}

impl TryFrom<u8> for ExtentMode {
    type Error = DnError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Tiny),
            other => Err(DnError::Protocol(format!("unknown extent mode {other}"))),
        }
    }
}
