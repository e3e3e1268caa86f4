//! 수신자
//!
//! - 소켓 하나에서 데이터그램을 하나씩 처리 (단일 소비자)
//! - 세션 테이블로 피어별 `next_expected` 관리
//! - 기대 번호: 수락 + 출력 + ACK / 직전 번호: ACK 만 재전송 / 그 외: 무응답 폐기

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chunk::{Chunk, SequenceNumber};
use crate::error::is_transient_io;
use crate::session::{Resolution, SessionTable};
use crate::stats::ReceiverStats;
use crate::transport::Transport;
use crate::{Config, Error, Result};

/// 최대 UDP 페이로드. 고정 크기보다 큰 데이터그램이 잘려서 정상으로 보이지 않도록 크게 잡는다.
const RECV_BUFFER_SIZE: usize = 65_535;

/// 출력된 페이로드 채널 수신기 타입
pub type DeliveryReceiver = mpsc::Receiver<Delivery>;

/// 수락되어 정확히 한 번 출력되는 청크
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub peer: SocketAddr,
    pub sequence: SequenceNumber,
    pub is_last: bool,
    pub payload: Bytes,
}

/// 폐기 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// 크기/헤더 오류
    Malformed,

    /// 세션 테이블 가득 참
    Rejected,

    /// 앞선 번호(갭) 또는 이미 지난 번호
    OutOfOrder,
}

/// 데이터그램 하나에 대한 처리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// 새 청크 수락: 출력 후 ACK
    Accept(Delivery),

    /// 직전 청크 재수신: ACK 만 재전송
    Duplicate { sequence: SequenceNumber },

    /// 무응답 폐기
    Drop(DropReason),
}

impl Verdict {
    /// ACK 전송 필요 여부
    pub fn needs_ack(&self) -> bool {
        !matches!(self, Verdict::Drop(_))
    }
}

/// 수신 판정기 (I/O 없음)
///
/// 디코딩 → 세션 조회 → 시퀀스 비교까지 담당한다.
pub struct Dispatcher {
    datagram_size: usize,
    table: SessionTable,
    stats: ReceiverStats,
}

impl Dispatcher {
    pub fn new(config: &Config) -> Self {
        Self {
            datagram_size: config.datagram_size,
            table: SessionTable::new(config.max_sessions, config.completed_linger()),
            stats: ReceiverStats::new(),
        }
    }

    pub fn table(&self) -> &SessionTable {
        &self.table
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    /// 데이터그램 하나 판정
    pub fn handle(&mut self, peer: SocketAddr, datagram: &[u8], now: Instant) -> Verdict {
        self.stats.datagrams += 1;

        let chunk = match Chunk::decode(datagram, self.datagram_size) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("잘못된 데이터그램 폐기: peer={}, {}", peer, e);
                self.stats.dropped_malformed += 1;
                return Verdict::Drop(DropReason::Malformed);
            }
        };
        let sequence = chunk.sequence();

        if self.table.is_completed_retransmit(peer, datagram, now) {
            debug!("완료된 세션의 마지막 청크 재수신: peer={}, seq={}", peer, sequence);
            self.stats.duplicate_chunks += 1;
            return Verdict::Duplicate { sequence };
        }

        let handle = match self.table.resolve(peer, now) {
            Resolution::Existing(handle) => handle,
            Resolution::Opened(handle) => {
                self.stats.sessions_opened += 1;
                info!(
                    "새 전송 시작: peer={} (활성 {}/{})",
                    peer,
                    self.table.active_count(),
                    self.table.capacity()
                );
                handle
            }
            Resolution::Rejected => {
                debug!("세션 테이블 가득 참, 무시: peer={}", peer);
                self.stats.dropped_rejected += 1;
                return Verdict::Drop(DropReason::Rejected);
            }
        };

        let Some(session) = self.table.get_mut(handle) else {
            self.stats.dropped_rejected += 1;
            return Verdict::Drop(DropReason::Rejected);
        };

        let received = u64::from(sequence);
        let expected = session.next_expected();

        if received == expected {
            session.advance(now);

            self.stats.accepted_chunks += 1;
            self.stats.bytes_delivered += chunk.payload.len() as u64;

            if chunk.is_last() {
                self.table.release(handle, datagram, now);
                self.stats.sessions_completed += 1;
                info!("전송 완료: peer={}, {} 청크", peer, sequence);
            } else {
                debug!("청크 수락: peer={}, seq={}", peer, sequence);
            }

            Verdict::Accept(Delivery {
                peer,
                sequence,
                is_last: chunk.is_last(),
                payload: chunk.payload,
            })
        } else if received + 1 == expected {
            session.touch(now);
            self.stats.duplicate_chunks += 1;
            debug!("중복 청크, ACK 재전송: peer={}, seq={}", peer, sequence);
            Verdict::Duplicate { sequence }
        } else {
            self.stats.dropped_out_of_order += 1;
            debug!(
                "순서 불일치 폐기: peer={}, seq={}, expected={}",
                peer, sequence, expected
            );
            Verdict::Drop(DropReason::OutOfOrder)
        }
    }

    /// 유휴 세션 회수
    pub fn sweep(&mut self, now: Instant, idle_timeout: std::time::Duration) -> usize {
        let reclaimed = self.table.reclaim_idle(now, idle_timeout);
        for peer in &reclaimed {
            warn!("유휴 세션 회수: peer={}", peer);
        }
        self.stats.sessions_reclaimed += reclaimed.len() as u64;
        reclaimed.len()
    }
}

/// 수신 루프 내부 상태 (단일 태스크에서만 접근)
struct ReceiveLoop<T> {
    config: Config,
    transport: T,
    dispatcher: Dispatcher,
    deliveries: mpsc::Sender<Delivery>,
    stats: Arc<RwLock<ReceiverStats>>,
    running: Arc<AtomicBool>,
}

impl<T: Transport> ReceiveLoop<T> {
    async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let poll_interval = self.config.poll_interval();
        let idle_timeout = self.config.session_idle_timeout();

        while self.running.load(Ordering::SeqCst) {
            match tokio::time::timeout(poll_interval, self.transport.recv_from(&mut buf)).await {
                Ok(Ok((len, peer))) => {
                    if let Err(e) = self.on_datagram(&buf[..len], peer).await {
                        self.running.store(false, Ordering::SeqCst);
                        return Err(e);
                    }
                }
                Ok(Err(e)) if is_transient_io(&e) => {
                    warn!("수신 에러 (무시): {}", e);
                }
                Ok(Err(e)) => {
                    error!("소켓 수신 실패: {}", e);
                    self.running.store(false, Ordering::SeqCst);
                    return Err(e.into());
                }
                Err(_) => {
                    // 타임아웃, 계속
                }
            }

            if let Some(idle_timeout) = idle_timeout {
                self.dispatcher.sweep(Instant::now(), idle_timeout);
            }

            // 통계 업데이트
            *self.stats.write() = self.dispatcher.stats().clone();
        }

        info!("수신 루프 종료: {}", self.dispatcher.stats().summary());
        Ok(())
    }

    async fn on_datagram(&mut self, datagram: &[u8], peer: SocketAddr) -> Result<()> {
        let verdict = self.dispatcher.handle(peer, datagram, Instant::now());

        if let Verdict::Accept(delivery) = &verdict {
            // 출력 후 ACK: ACK 가 나간 청크는 항상 출력된 상태
            self.deliveries
                .send(delivery.clone())
                .await
                .map_err(|_| Error::ChannelClosed)?;
        }

        if verdict.needs_ack() {
            // ACK 는 받은 데이터그램을 그대로 되돌려 보낸다
            match self.transport.send_to(datagram, peer).await {
                Ok(_) => {}
                Err(e) if is_transient_io(&e) => warn!("ACK 전송 실패: peer={}, {}", peer, e),
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

/// 수신자 핸들 (외부에서 제어용)
pub struct Receiver {
    local_addr: SocketAddr,
    stats: Arc<RwLock<ReceiverStats>>,
    running: Arc<AtomicBool>,
    task: JoinHandle<Result<()>>,
}

impl Receiver {
    /// 수신 루프 시작
    ///
    /// 반환된 채널로 수락된 페이로드가 순서대로 정확히 한 번씩 전달된다.
    pub fn start<T>(config: Config, transport: T) -> Result<(Self, DeliveryReceiver)>
    where
        T: Transport + 'static,
    {
        config.validate()?;

        let local_addr = transport.local_addr()?;
        let (delivery_tx, delivery_rx) = mpsc::channel(config.delivery_queue_size);

        let stats = Arc::new(RwLock::new(ReceiverStats::new()));
        let running = Arc::new(AtomicBool::new(true));

        info!(
            "SWT Receiver started on {} (datagram {} bytes, {} sessions)",
            local_addr, config.datagram_size, config.max_sessions
        );

        let receive_loop = ReceiveLoop {
            dispatcher: Dispatcher::new(&config),
            config,
            transport,
            deliveries: delivery_tx,
            stats: stats.clone(),
            running: running.clone(),
        };
        let task = tokio::spawn(receive_loop.run());

        let receiver = Self {
            local_addr,
            stats,
            running,
            task,
        };

        Ok((receiver, delivery_rx))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 정지 (다음 poll 주기에 루프 종료)
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    /// 통계 반환
    pub fn stats(&self) -> ReceiverStats {
        self.stats.read().clone()
    }

    /// 루프 종료 대기. 치명적 소켓 에러는 여기서 드러난다.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?
    }
}
