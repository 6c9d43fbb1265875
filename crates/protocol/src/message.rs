//! The closed set of message kinds exchanged between a client and the
//! coordinator, and their fixed field arity.
//!
//! Field values are carried as ASCII strings regardless of their logical
//! type (sizes and mtimes included); callers parse them at the point of
//! use, the same duck-typed shape the wire format itself uses.

/// One message kind, tagged with the numeric type code used on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    RequestFile = 1,
    CheckLocal = 2,
    CheckRemote = 3,
    FileOk = 4,
    CopyFromNode = 5,
    CopyFromServer = 6,
    CopyOk = 7,
    CopyFailed = 8,
    FileNotOk = 9,
    Fallback = 10,
    HaveFile = 11,
    Wait = 12,
    RegisterCopy = 13,
    DeletedCopy = 14,
    Exit = 15,
    KeepAlive = 16,
    GetLocations = 17,
    IsActive = 18,
    Ping = 19,
}

impl MessageKind {
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => Self::RequestFile,
            2 => Self::CheckLocal,
            3 => Self::CheckRemote,
            4 => Self::FileOk,
            5 => Self::CopyFromNode,
            6 => Self::CopyFromServer,
            7 => Self::CopyOk,
            8 => Self::CopyFailed,
            9 => Self::FileNotOk,
            10 => Self::Fallback,
            11 => Self::HaveFile,
            12 => Self::Wait,
            13 => Self::RegisterCopy,
            14 => Self::DeletedCopy,
            15 => Self::Exit,
            16 => Self::KeepAlive,
            17 => Self::GetLocations,
            18 => Self::IsActive,
            19 => Self::Ping,
            _ => return None,
        })
    }

    #[must_use]
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Number of length-prefixed fields this kind carries, per the wire
    /// format table.
    #[must_use]
    pub fn arity(self) -> usize {
        match self {
            Self::RequestFile => 6,
            Self::GetLocations => 4,
            Self::CheckLocal => 1,
            Self::CheckRemote => 2,
            Self::FileOk | Self::FileNotOk => 0,
            Self::CopyFromNode => 2,
            Self::CopyFromServer => 0,
            Self::CopyOk => 1,
            Self::CopyFailed => 0,
            Self::Fallback => 0,
            Self::HaveFile => 4,
            Self::DeletedCopy => 4,
            Self::Wait => 1,
            Self::RegisterCopy => 4,
            Self::Exit => 0,
            Self::KeepAlive => 0,
            Self::IsActive => 1,
            Self::Ping => 0,
        }
    }
}

/// A single parsed wire message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    RequestFile {
        origin_path: String,
        size: String,
        mtime: String,
        file_server: String,
        local_destination: String,
        locate_limit: String,
    },
    GetLocations {
        origin_path: String,
        size: String,
        mtime: String,
        locate_limit: String,
    },
    CheckLocal {
        local_path: String,
    },
    CheckRemote {
        host: String,
        remote_path: String,
    },
    FileOk,
    FileNotOk,
    CopyFromNode {
        host: String,
        remote_path: String,
    },
    CopyFromServer,
    CopyOk {
        resulting_local_path: String,
    },
    CopyFailed,
    Fallback,
    HaveFile {
        origin_path: String,
        size: String,
        mtime: String,
        local_path: String,
    },
    DeletedCopy {
        origin_path: String,
        size: String,
        mtime: String,
        local_path: String,
    },
    Wait {
        wait_seconds: String,
    },
    RegisterCopy {
        origin_path: String,
        size: String,
        mtime: String,
        destination_file_server: String,
    },
    Exit,
    KeepAlive,
    IsActive {
        local_destination: String,
    },
    Ping,
}

impl Message {
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::RequestFile { .. } => MessageKind::RequestFile,
            Self::GetLocations { .. } => MessageKind::GetLocations,
            Self::CheckLocal { .. } => MessageKind::CheckLocal,
            Self::CheckRemote { .. } => MessageKind::CheckRemote,
            Self::FileOk => MessageKind::FileOk,
            Self::FileNotOk => MessageKind::FileNotOk,
            Self::CopyFromNode { .. } => MessageKind::CopyFromNode,
            Self::CopyFromServer => MessageKind::CopyFromServer,
            Self::CopyOk { .. } => MessageKind::CopyOk,
            Self::CopyFailed => MessageKind::CopyFailed,
            Self::Fallback => MessageKind::Fallback,
            Self::HaveFile { .. } => MessageKind::HaveFile,
            Self::DeletedCopy { .. } => MessageKind::DeletedCopy,
            Self::Wait { .. } => MessageKind::Wait,
            Self::RegisterCopy { .. } => MessageKind::RegisterCopy,
            Self::Exit => MessageKind::Exit,
            Self::KeepAlive => MessageKind::KeepAlive,
            Self::IsActive { .. } => MessageKind::IsActive,
            Self::Ping => MessageKind::Ping,
        }
    }

    /// Field values in wire order. Length matches `self.kind().arity()`.
    pub(crate) fn fields(&self) -> Vec<&str> {
        match self {
            Self::RequestFile {
                origin_path,
                size,
                mtime,
                file_server,
                local_destination,
                locate_limit,
            } => vec![origin_path, size, mtime, file_server, local_destination, locate_limit],
            Self::GetLocations {
                origin_path,
                size,
                mtime,
                locate_limit,
            } => vec![origin_path, size, mtime, locate_limit],
            Self::CheckLocal { local_path } => vec![local_path],
            Self::CheckRemote { host, remote_path } => vec![host, remote_path],
            Self::FileOk | Self::FileNotOk | Self::CopyFromServer | Self::CopyFailed
            | Self::Fallback | Self::Exit | Self::KeepAlive | Self::Ping => vec![],
            Self::CopyFromNode { host, remote_path } => vec![host, remote_path],
            Self::CopyOk { resulting_local_path } => vec![resulting_local_path],
            Self::HaveFile {
                origin_path,
                size,
                mtime,
                local_path,
            }
            | Self::DeletedCopy {
                origin_path,
                size,
                mtime,
                local_path,
            } => vec![origin_path, size, mtime, local_path],
            Self::Wait { wait_seconds } => vec![wait_seconds],
            Self::RegisterCopy {
                origin_path,
                size,
                mtime,
                destination_file_server,
            } => vec![origin_path, size, mtime, destination_file_server],
            Self::IsActive { local_destination } => vec![local_destination],
        }
    }

    /// Build a message from a decoded kind and its fields. `fields.len()`
    /// is guaranteed by the caller (the codec loop) to equal
    /// `kind.arity()`.
    pub(crate) fn from_parts(kind: MessageKind, mut fields: Vec<String>) -> Self {
        macro_rules! take {
            () => {
                fields.remove(0)
            };
        }
        match kind {
            MessageKind::RequestFile => Self::RequestFile {
                origin_path: take!(),
                size: take!(),
                mtime: take!(),
                file_server: take!(),
                local_destination: take!(),
                locate_limit: take!(),
            },
            MessageKind::GetLocations => Self::GetLocations {
                origin_path: take!(),
                size: take!(),
                mtime: take!(),
                locate_limit: take!(),
            },
            MessageKind::CheckLocal => Self::CheckLocal { local_path: take!() },
            MessageKind::CheckRemote => Self::CheckRemote {
                host: take!(),
                remote_path: take!(),
            },
            MessageKind::FileOk => Self::FileOk,
            MessageKind::FileNotOk => Self::FileNotOk,
            MessageKind::CopyFromNode => Self::CopyFromNode {
                host: take!(),
                remote_path: take!(),
            },
            MessageKind::CopyFromServer => Self::CopyFromServer,
            MessageKind::CopyOk => Self::CopyOk {
                resulting_local_path: take!(),
            },
            MessageKind::CopyFailed => Self::CopyFailed,
            MessageKind::Fallback => Self::Fallback,
            MessageKind::HaveFile => Self::HaveFile {
                origin_path: take!(),
                size: take!(),
                mtime: take!(),
                local_path: take!(),
            },
            MessageKind::DeletedCopy => Self::DeletedCopy {
                origin_path: take!(),
                size: take!(),
                mtime: take!(),
                local_path: take!(),
            },
            MessageKind::Wait => Self::Wait { wait_seconds: take!() },
            MessageKind::RegisterCopy => Self::RegisterCopy {
                origin_path: take!(),
                size: take!(),
                mtime: take!(),
                destination_file_server: take!(),
            },
            MessageKind::Exit => Self::Exit,
            MessageKind::KeepAlive => Self::KeepAlive,
            MessageKind::IsActive => Self::IsActive {
                local_destination: take!(),
            },
            MessageKind::Ping => Self::Ping,
        }
    }
}
