//! 전송 통계

use std::time::{Duration, Instant};

/// 수신측 통계
#[derive(Debug, Clone)]
pub struct ReceiverStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 수신한 데이터그램 수 (모든 종류)
    pub datagrams: u64,

    /// 수락된 청크 수
    pub accepted_chunks: u64,

    /// 중복 청크 수 (ACK 재전송)
    pub duplicate_chunks: u64,

    /// 크기/헤더 오류로 버린 데이터그램
    pub dropped_malformed: u64,

    /// 세션 테이블이 가득 차서 버린 데이터그램
    pub dropped_rejected: u64,

    /// 순서가 맞지 않아 버린 데이터그램
    pub dropped_out_of_order: u64,

    /// 생성된 세션 수
    pub sessions_opened: u64,

    /// 마지막 청크까지 받은 세션 수
    pub sessions_completed: u64,

    /// 유휴 회수된 세션 수
    pub sessions_reclaimed: u64,

    /// 출력한 페이로드 바이트
    pub bytes_delivered: u64,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            datagrams: 0,
            accepted_chunks: 0,
            duplicate_chunks: 0,
            dropped_malformed: 0,
            dropped_rejected: 0,
            dropped_out_of_order: 0,
            sessions_opened: 0,
            sessions_completed: 0,
            sessions_reclaimed: 0,
            bytes_delivered: 0,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 버린 데이터그램 총합
    pub fn total_dropped(&self) -> u64 {
        self.dropped_malformed + self.dropped_rejected + self.dropped_out_of_order
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Datagrams: {} | Accepted: {} | Duplicates: {} | Dropped: {} (malformed {}, rejected {}, out-of-order {}) | Sessions: {}/{} | Bytes: {}",
            self.elapsed().as_secs_f64(),
            self.datagrams,
            self.accepted_chunks,
            self.duplicate_chunks,
            self.total_dropped(),
            self.dropped_malformed,
            self.dropped_rejected,
            self.dropped_out_of_order,
            self.sessions_completed,
            self.sessions_opened,
            self.bytes_delivered,
        )
    }
}

impl Default for ReceiverStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 송신측 통계
#[derive(Debug, Clone)]
pub struct SenderStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 처음 전송한 청크 수
    pub chunks_sent: u64,

    /// 재전송 수
    pub retransmissions: u64,

    /// ACK 타임아웃 수
    pub timeouts: u64,

    /// 다른 번호/깨진 ACK 수
    pub stale_acks: u64,

    /// ACK 받은 청크 수
    pub acked_chunks: u64,

    /// ACK 받은 페이로드 바이트
    pub bytes_acked: u64,
}

impl SenderStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            chunks_sent: 0,
            retransmissions: 0,
            timeouts: 0,
            stale_acks: 0,
            acked_chunks: 0,
            bytes_acked: 0,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 실효 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_acked as f64 / elapsed
    }

    /// 재전송 비율
    pub fn retransmit_ratio(&self) -> f64 {
        let total = self.chunks_sent + self.retransmissions;
        if total == 0 {
            return 0.0;
        }
        self.retransmissions as f64 / total as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Chunks: {}/{} acked | Retransmits: {} ({:.1}%) | Timeouts: {} | Stale ACKs: {} | Bytes: {} | Throughput: {:.2} KB/s",
            self.elapsed().as_secs_f64(),
            self.acked_chunks,
            self.chunks_sent,
            self.retransmissions,
            self.retransmit_ratio() * 100.0,
            self.timeouts,
            self.stale_acks,
            self.bytes_acked,
            self.throughput() / 1000.0,
        )
    }
}

impl Default for SenderStats {
    fn default() -> Self {
        Self::new()
    }
}
