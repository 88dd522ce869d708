//! Fault classification into the closed result-code set.
//!
//! Two ordered tiers. A fault raised while talking to another replica is
//! always an intra-group network fault, whatever it says. Everything else is
//! switched on its storage tag; anything untagged falls through to the
//! network fault as well.

use crate::opcode::{Opcode, ResultCode};
use dn_core::{DnError, StorageFault};

/// The handling step in which a fault was raised. The label is the prefix of
/// the error body sent back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    PreparePkg,
    OperatePkg,
    SendToFollowers,
    ReceiveFromFollower,
    ConnIsNull,
    CheckAndAddInfos,
    ReceiveFromClient,
    WriteToClient,
}

impl Action {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::PreparePkg => "PreparePkg",
            Self::OperatePkg => "OperatePkg",
            Self::SendToFollowers => "SendToFollowers",
            Self::ReceiveFromFollower => "ReceiveFromFollower",
            Self::ConnIsNull => "ConnIsNull",
            Self::CheckAndAddInfos => "CheckAndAddInfos",
            Self::ReceiveFromClient => "ReceiveFromClient",
            Self::WriteToClient => "WriteToClient",
        }
    }

    /// Steps that exchange bytes with, or register against, another replica.
    #[inline]
    #[must_use]
    pub const fn is_peer_communication(self) -> bool {
        matches!(
            self,
            Self::ReceiveFromFollower
                | Self::SendToFollowers
                | Self::ConnIsNull
                | Self::CheckAndAddInfos
        )
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Map a fault raised during `action` on a packet carrying `opcode` to a
/// result code. The returned code is not yet rewritten for the wire; see
/// `ResultCode::for_wire`.
#[must_use]
pub fn classify(action: Action, err: &DnError, opcode: Opcode) -> ResultCode {
    if action.is_peer_communication() || matches!(err, DnError::ConnIsNull(_)) {
        return ResultCode::IntraGroupNetErr;
    }

    match err {
        DnError::Storage(fault) => classify_storage(fault, opcode),
        DnError::UnknownOpcode(_) => ResultCode::ArgMismatch,
        _ => ResultCode::IntraGroupNetErr,
    }
}

fn classify_storage(fault: &StorageFault, opcode: Opcode) -> ResultCode {
    match fault {
        StorageFault::ParamMismatch => ResultCode::ArgMismatch,
        // A write landing on a replica with no record of the extent means the
        // replicas diverged: retry through repair, not a clean not-found
        StorageFault::ExtentNotFound if opcode == Opcode::Write => ResultCode::IntraGroupNetErr,
        StorageFault::ExtentNotFound | StorageFault::ExtentDeleted => ResultCode::NotExist,
        StorageFault::NoSpace => ResultCode::DiskNoSpace,
        StorageFault::Disk { .. } => ResultCode::DiskErr,
        StorageFault::TryAgain => ResultCode::Again,
        StorageFault::NotLeader => ResultCode::NotLeader,
        StorageFault::Other(_) => ResultCode::IntraGroupNetErr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER_ACTIONS: [Action; 4] = [
        Action::ReceiveFromFollower,
        Action::SendToFollowers,
        Action::ConnIsNull,
        Action::CheckAndAddInfos,
    ];

    fn all_faults() -> Vec<DnError> {
        vec![
            StorageFault::ParamMismatch.into(),
            StorageFault::ExtentNotFound.into(),
            StorageFault::ExtentDeleted.into(),
            StorageFault::NoSpace.into(),
            StorageFault::Disk {
                detail: "eio".into(),
            }
            .into(),
            StorageFault::TryAgain.into(),
            StorageFault::NotLeader.into(),
            DnError::UnknownOpcode(0x42),
            DnError::timed_out("follower read"),
            DnError::PoolExhausted,
        ]
    }

    #[test]
    fn test_peer_actions_always_network_fault() {
        for action in PEER_ACTIONS {
            for err in all_faults() {
                for opcode in [Opcode::Write, Opcode::Read, Opcode::ExtentRepairRead] {
                    assert_eq!(
                        classify(action, &err, opcode),
                        ResultCode::IntraGroupNetErr,
                        "{action} / {err}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_storage_tags() {
        let op = Opcode::Read;
        let a = Action::OperatePkg;
        let cases = [
            (StorageFault::ParamMismatch, ResultCode::ArgMismatch),
            (StorageFault::ExtentNotFound, ResultCode::NotExist),
            (StorageFault::ExtentDeleted, ResultCode::NotExist),
            (StorageFault::NoSpace, ResultCode::DiskNoSpace),
            (StorageFault::TryAgain, ResultCode::Again),
            (StorageFault::NotLeader, ResultCode::NotLeader),
            (StorageFault::Other("odd".into()), ResultCode::IntraGroupNetErr),
        ];
        for (fault, expected) in cases {
            assert_eq!(classify(a, &fault.into(), op), expected);
        }
    }

    #[test]
    fn test_unknown_opcode_is_arg_mismatch() {
        assert_eq!(
            classify(Action::OperatePkg, &DnError::UnknownOpcode(0x55), Opcode::Unknown(0x55)),
            ResultCode::ArgMismatch
        );
    }

    #[test]
    fn test_write_not_found_escalates() {
        let err = DnError::from(StorageFault::ExtentNotFound);
        assert_eq!(
            classify(Action::OperatePkg, &err, Opcode::Write),
            ResultCode::IntraGroupNetErr
        );
        // Deleted extents stay a clean not-found even for writes
        let err = DnError::from(StorageFault::ExtentDeleted);
        assert_eq!(
            classify(Action::OperatePkg, &err, Opcode::Write),
            ResultCode::NotExist
        );
    }

    #[test]
    fn test_unmatched_fault_defaults_to_network() {
        let err = DnError::ArgLenMismatch {
            declared: 40,
            available: 12,
        };
        assert_eq!(
            classify(Action::PreparePkg, &err, Opcode::Write),
            ResultCode::IntraGroupNetErr
        );
    }

    #[test]
    fn test_null_connection_fault_under_any_action() {
        let err = DnError::ConnIsNull("10.0.0.3:17310".into());
        assert_eq!(
            classify(Action::OperatePkg, &err, Opcode::Read),
            ResultCode::IntraGroupNetErr
        );
    }
}
