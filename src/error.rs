//! 에러 타입 정의

use std::io;

use thiserror::Error;

/// SWT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("잘못된 데이터그램 크기: expected {expected}, got {got}")]
    MalformedDatagram { expected: usize, got: usize },

    #[error("유효하지 않은 last 플래그: {value}")]
    InvalidFlag { value: u32 },

    #[error("유효하지 않은 시퀀스 번호: 0")]
    InvalidSequence,

    #[error("페이로드 초과: {len} bytes > capacity {capacity}")]
    PayloadTooLarge { len: usize, capacity: usize },

    #[error("시퀀스 번호 소진")]
    SequenceExhausted,

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("채널 닫힘")]
    ChannelClosed,
}

impl Error {
    /// 디코딩 실패 여부 (데이터그램을 버리고 계속 진행해야 하는 경우)
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Error::MalformedDatagram { .. }
                | Error::InvalidFlag { .. }
                | Error::InvalidSequence
                | Error::Serialization(_)
        )
    }

    /// 루프를 종료시키지 않아야 하는 일시적 소켓 에러 여부
    ///
    /// UDP에서 ICMP unreachable 은 다음 recv 에 ConnectionReset/Refused 로 나타난다.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Io(e) => is_transient_io(e),
            _ => false,
        }
    }
}

pub(crate) fn is_transient_io(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
