//! 프로토콜 설정

use std::time::Duration;

use crate::{
    Error, Result, DATAGRAM_SIZE, DEFAULT_ACK_TIMEOUT_MS, DEFAULT_MAX_RETRIES,
    DEFAULT_MAX_SESSIONS, HEADER_SIZE,
};

/// SWT 프로토콜 설정
///
/// 송신자와 수신자는 `datagram_size` 가 반드시 같아야 한다.
#[derive(Debug, Clone)]
pub struct Config {
    /// 데이터그램 크기 (바이트, 헤더 포함)
    pub datagram_size: usize,

    /// ACK 대기 타임아웃 (밀리초)
    pub ack_timeout_ms: u64,

    /// 청크당 최대 재전송 횟수 (첫 전송 제외)
    ///
    /// 한 청크는 최대 `max_retries + 1` 번 전송된다. 0이면 재전송 없음.
    pub max_retries: u32,

    /// 최대 동시 세션 수
    pub max_sessions: usize,

    /// 유휴 세션 회수 시간 (밀리초)
    /// 0이면 회수하지 않음
    pub session_idle_timeout_ms: u64,

    /// 완료된 세션의 마지막 ACK 기억 시간 (밀리초)
    /// 0이면 기억하지 않음
    pub completed_linger_ms: u64,

    /// 수신 루프 주기 (밀리초)
    pub poll_interval_ms: u64,

    /// 페이로드 전달 채널 크기
    pub delivery_queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            datagram_size: DATAGRAM_SIZE,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,   // 500ms
            max_retries: DEFAULT_MAX_RETRIES,         // 5회 (총 6회 전송)
            max_sessions: DEFAULT_MAX_SESSIONS,       // 5개
            session_idle_timeout_ms: 0,               // 회수 안 함
            completed_linger_ms: 3000,                // 재시도 구간 + 여유
            poll_interval_ms: 100,
            delivery_queue_size: 1024,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 청크당 페이로드 크기
    pub fn payload_capacity(&self) -> usize {
        self.datagram_size.saturating_sub(HEADER_SIZE)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn session_idle_timeout(&self) -> Option<Duration> {
        (self.session_idle_timeout_ms > 0)
            .then(|| Duration::from_millis(self.session_idle_timeout_ms))
    }

    pub fn completed_linger(&self) -> Option<Duration> {
        (self.completed_linger_ms > 0).then(|| Duration::from_millis(self.completed_linger_ms))
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.datagram_size <= HEADER_SIZE {
            return Err(Error::InvalidConfig(format!(
                "datagram_size {} 는 헤더 크기 {} 보다 커야 함",
                self.datagram_size, HEADER_SIZE
            )));
        }
        if self.max_sessions == 0 {
            return Err(Error::InvalidConfig("max_sessions 는 1 이상".into()));
        }
        if self.ack_timeout_ms == 0 {
            return Err(Error::InvalidConfig("ack_timeout_ms 는 1 이상".into()));
        }
        if self.delivery_queue_size == 0 {
            return Err(Error::InvalidConfig("delivery_queue_size 는 1 이상".into()));
        }
        Ok(())
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            ack_timeout_ms: 1000,
            max_retries: 10,
            session_idle_timeout_ms: 60_000,  // 1분 무응답 세션 회수
            completed_linger_ms: 12_000,
            ..Self::default()
        }
    }

    /// 저지연 (LAN) 설정
    pub fn low_latency() -> Self {
        Self {
            ack_timeout_ms: 50,
            completed_linger_ms: 500,
            poll_interval_ms: 20,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_reference() {
        let config = Config::default();
        assert_eq!(config.datagram_size, 576);
        assert_eq!(config.payload_capacity(), 568);
        assert_eq!(config.ack_timeout(), Duration::from_millis(500));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_sessions, 5);
        assert!(config.session_idle_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.datagram_size = HEADER_SIZE;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));


        let mut config = Config::default();
        config.max_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retries_is_single_shot() {
        let config = Config {
            max_retries: 0,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(Config::unstable_network().validate().is_ok());
        assert!(Config::low_latency().validate().is_ok());
        assert!(Config::unstable_network().session_idle_timeout().is_some());
    }
}
