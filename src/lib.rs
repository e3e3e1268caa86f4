//! # SWT (Stop-and-Wait Transfer)
//!
//! UDP 기반 ACK/재전송 방식의 신뢰성 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **고정 크기 데이터그램**: 576 바이트, 헤더 8 바이트 (sequence + last flag)
//! - **Stop-and-Wait**: 청크 하나씩 전송, ACK 대기, 타임아웃 시 재전송
//! - **중복 억제**: 재조립 버퍼 없이 `next_expected` 하나로 정확히 한 번 출력
//! - **세션 테이블**: 최대 5개 송신자 동시 수신, 초과 시 조용히 무시
//! - **청크 단위 재시도**: 한 청크에서 재전송 5회까지 모두 실패해야 전송 중단

pub mod chunk;
pub mod config;
pub mod error;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod simulator;
pub mod stats;
pub mod transport;

pub use chunk::{Chunk, ChunkHeader, ChunkReader, SequenceNumber};
pub use config::Config;
pub use error::{Error, Result};
pub use receiver::{Delivery, DeliveryReceiver, Dispatcher, Receiver, Verdict};
pub use sender::{FileSender, Sender, SenderState, TransferOutcome};
pub use session::{Resolution, SessionHandle, SessionTable};
pub use simulator::{FaultPlan, FaultyTransport};
pub use stats::{ReceiverStats, SenderStats};
pub use transport::{ephemeral_bind_addr, resolve_peer, Transport};

/// 기본 데이터그램 크기 (바이트)
pub const DATAGRAM_SIZE: usize = 576;

/// 헤더 크기: sequence(4) + last flag(4)
pub const HEADER_SIZE: usize = 8;

/// 기본 청크당 페이로드 크기
pub const PAYLOAD_CAPACITY: usize = DATAGRAM_SIZE - HEADER_SIZE;

/// 기본 동시 세션 수
pub const DEFAULT_MAX_SESSIONS: usize = 5;

/// 기본 ACK 대기 시간 (밀리초)
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 500;

/// 청크당 기본 최대 재전송 횟수 (첫 전송 제외, 총 6회 전송)
pub const DEFAULT_MAX_RETRIES: u32 = 5;
