//! 송신자
//!
//! - 청크 하나씩 전송하고 같은 번호의 ACK 를 기다림 (Stop-and-Wait)
//! - ACK 대기는 명시적 데드라인으로 제한 (기본 500ms)
//! - 재시도 횟수는 청크마다 초기화, 한 청크에서 재전송 `max_retries` 회까지 모두 실패해야 포기
//!
//! 상태 전이:
//! `ReadNext → Sending → AwaitingAck → {Sending | ReadNext | Done | Aborted}`

use std::net::SocketAddr;
use std::path::Path;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::chunk::{Chunk, ChunkReader, SequenceNumber};
use crate::error::is_transient_io;
use crate::stats::SenderStats;
use crate::transport::{ephemeral_bind_addr, Transport};
use crate::{Config, Result};

/// 송신 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// 다음 청크 읽기
    ReadNext,

    /// 현재 청크 (재)전송
    Sending,

    /// ACK 또는 데드라인 대기
    AwaitingAck,

    /// 마지막 청크까지 ACK 받음
    Done,

    /// 한 청크에서 시도 횟수 소진
    Aborted,
}

/// 전송 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// 모든 청크 전달 완료
    Delivered { chunks: SequenceNumber, bytes: u64 },

    /// 재시도 소진으로 포기. 이전 청크들은 이미 수신측에 전달된 상태
    Abandoned {
        sequence: SequenceNumber,
        attempts: u32,
        delivered_chunks: SequenceNumber,
    },
}

impl TransferOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, TransferOutcome::Delivered { .. })
    }
}

/// ACK 대기 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckWait {
    Acked,
    Mismatch(SequenceNumber),
    Malformed,
    TimedOut,
}

/// 송신자 (스트림 하나)
pub struct Sender<T> {
    config: Config,
    transport: T,
    peer: SocketAddr,
    state: SenderState,
    stats: SenderStats,
}

impl<T: Transport> Sender<T> {
    /// 새 송신자 생성
    pub fn new(config: Config, transport: T, peer: SocketAddr) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            transport,
            peer,
            state: SenderState::ReadNext,
            stats: SenderStats::new(),
        })
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// 통계 반환
    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    /// 바이트 스트림 전체 전송
    ///
    /// 재시도 소진은 에러가 아니라 [`TransferOutcome::Abandoned`] 로 돌려준다.
    /// 에러는 입력 스트림이나 소켓 자체의 실패뿐이다.
    pub async fn send_stream<R>(&mut self, reader: R) -> Result<TransferOutcome>
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = ChunkReader::new(reader, self.config.payload_capacity());
        let mut buf = vec![0u8; self.config.datagram_size + 1];

        let mut current: Option<(Chunk, Bytes)> = None;
        // 현재 청크의 전송 횟수 (첫 전송 포함)
        let mut attempts = 0u32;
        let max_transmissions = self.config.max_retries.saturating_add(1);
        let mut deadline = Instant::now();
        let mut delivered: SequenceNumber = 0;

        self.stats = SenderStats::new();
        self.state = SenderState::ReadNext;

        info!("전송 시작: peer={}", self.peer);

        loop {
            match self.state {
                SenderState::ReadNext => match reader.next_chunk().await? {
                    Some(chunk) => {
                        let datagram = chunk.encode(self.config.datagram_size)?;
                        current = Some((chunk, datagram));
                        attempts = 0;
                        self.state = SenderState::Sending;
                    }
                    None => self.state = SenderState::Done,
                },

                SenderState::Sending => {
                    let Some((chunk, datagram)) = current.as_ref() else {
                        self.state = SenderState::ReadNext;
                        continue;
                    };

                    attempts += 1;
                    if attempts == 1 {
                        self.stats.chunks_sent += 1;
                    } else {
                        self.stats.retransmissions += 1;
                    }

                    debug!(
                        "청크 전송: seq={}, last={}, attempt {}/{}",
                        chunk.sequence(),
                        chunk.is_last(),
                        attempts,
                        max_transmissions
                    );

                    match self.transport.send_to(datagram, self.peer).await {
                        Ok(_) => {}
                        Err(e) if is_transient_io(&e) => warn!("전송 실패 (재시도): {}", e),
                        Err(e) => return Err(e.into()),
                    }

                    deadline = Instant::now() + self.config.ack_timeout();
                    self.state = SenderState::AwaitingAck;
                }

                SenderState::AwaitingAck => {
                    let Some((chunk, _)) = current.as_ref() else {
                        self.state = SenderState::ReadNext;
                        continue;
                    };
                    let sequence = chunk.sequence();

                    match self.await_ack(sequence, deadline, &mut buf).await? {
                        AckWait::Acked => {
                            delivered = sequence;
                            self.stats.acked_chunks += 1;
                            self.stats.bytes_acked += chunk.payload.len() as u64;

                            self.state = if chunk.is_last() {
                                SenderState::Done
                            } else {
                                SenderState::ReadNext
                            };
                        }
                        failure => {
                            match failure {
                                AckWait::TimedOut => {
                                    self.stats.timeouts += 1;
                                    warn!(
                                        "ACK 타임아웃: seq={}, attempt {}/{}",
                                        sequence, attempts, max_transmissions
                                    );
                                }
                                AckWait::Mismatch(got) => {
                                    self.stats.stale_acks += 1;
                                    debug!("다른 번호의 ACK: expected={}, got={}", sequence, got);
                                }
                                _ => {
                                    self.stats.stale_acks += 1;
                                    debug!("깨진 ACK: seq={}", sequence);
                                }
                            }

                            // 재전송 횟수(attempts - 1)가 한도 미만이면 다시 전송
                            self.state = if attempts <= self.config.max_retries {
                                SenderState::Sending
                            } else {
                                SenderState::Aborted
                            };
                        }
                    }
                }

                SenderState::Done => {
                    info!("전송 완료: {}", self.stats.summary());
                    return Ok(TransferOutcome::Delivered {
                        chunks: delivered,
                        bytes: self.stats.bytes_acked,
                    });
                }

                SenderState::Aborted => {
                    let sequence = current.as_ref().map_or(0, |(chunk, _)| chunk.sequence());
                    warn!(
                        "전송 포기: seq={} 에서 {}회 연속 실패 ({} 청크 전달됨)",
                        sequence, attempts, delivered
                    );
                    return Ok(TransferOutcome::Abandoned {
                        sequence,
                        attempts,
                        delivered_chunks: delivered,
                    });
                }
            }
        }
    }

    /// 데드라인까지 ACK 대기
    ///
    /// 피어가 아닌 주소에서 온 데이터그램은 무시하고 계속 기다린다.
    async fn await_ack(
        &mut self,
        sequence: SequenceNumber,
        deadline: Instant,
        buf: &mut [u8],
    ) -> Result<AckWait> {
        loop {
            let (len, from) =
                match tokio::time::timeout_at(deadline, self.transport.recv_from(buf)).await {
                    Err(_) => return Ok(AckWait::TimedOut),
                    Ok(Ok(received)) => received,
                    Ok(Err(e)) if is_transient_io(&e) => {
                        debug!("ACK 수신 에러 (무시): {}", e);
                        continue;
                    }
                    Ok(Err(e)) => return Err(e.into()),
                };

            if from != self.peer {
                debug!("피어가 아닌 주소의 데이터그램 무시: {}", from);
                continue;
            }

            return Ok(match Chunk::decode(&buf[..len], self.config.datagram_size) {
                Ok(ack) if ack.sequence() == sequence => AckWait::Acked,
                Ok(ack) => AckWait::Mismatch(ack.sequence()),
                Err(_) => AckWait::Malformed,
            });
        }
    }
}

/// 간단한 파일 전송용 송신자
pub struct FileSender {
    sender: Sender<UdpSocket>,
}

impl FileSender {
    /// 피어 주소 계열에 맞는 임시 포트로 소켓 바인딩
    pub async fn connect(config: Config, peer: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(ephemeral_bind_addr(peer)).await?;

        Ok(Self {
            sender: Sender::new(config, socket, peer)?,
        })
    }

    /// 파일 전송
    pub async fn send_file(&mut self, path: impl AsRef<Path>) -> Result<TransferOutcome> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        info!("파일 전송: {:?} -> {}", path.as_ref(), self.sender.peer());
        self.sender.send_stream(file).await
    }

    /// 통계 반환
    pub fn stats(&self) -> &SenderStats {
        self.sender.stats()
    }

    pub fn state(&self) -> SenderState {
        self.sender.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::task::JoinHandle;

    use crate::chunk::peek_sequence;
    use crate::DATAGRAM_SIZE;

    fn test_config() -> Config {
        Config {
            ack_timeout_ms: 30,
            ..Config::default()
        }
    }

    /// 스크립트대로 응답하는 가짜 수신자. 받은 데이터그램 목록을 돌려준다.
    fn fake_peer<F>(socket: UdpSocket, mut reply: F) -> JoinHandle<Vec<Vec<u8>>>
    where
        F: FnMut(usize, &[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut received = Vec::new();
            let mut buf = [0u8; 2048];
            while let Ok(Ok((len, from))) =
                tokio::time::timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await
            {
                let datagram = buf[..len].to_vec();
                if let Some(answer) = reply(received.len(), &datagram) {
                    socket.send_to(&answer, from).await.unwrap();
                }
                received.push(datagram);
            }
            received
        })
    }

    async fn sender_to(peer_socket: &UdpSocket) -> Sender<UdpSocket> {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Sender::new(test_config(), socket, peer_socket.local_addr().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_echo_peer_receives_whole_stream() {
        let peer_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut sender = sender_to(&peer_socket).await;
        let peer = fake_peer(peer_socket, |_, d| Some(d.to_vec()));

        let data: Vec<u8> = (0..2000u32).map(|i| (i % 200) as u8 + 1).collect();
        let outcome = sender.send_stream(&data[..]).await.unwrap();

        assert_eq!(
            outcome,
            TransferOutcome::Delivered {
                chunks: 4,
                bytes: 2000
            }
        );
        assert_eq!(sender.state(), SenderState::Done);
        assert_eq!(sender.stats().retransmissions, 0);

        let received = peer.await.unwrap();
        let chunks: Vec<Chunk> = received
            .iter()
            .map(|d| Chunk::decode(d, DATAGRAM_SIZE).unwrap())
            .collect();
        assert_eq!(chunks.len(), 4);
        assert!(chunks[3].is_last());
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.payload.to_vec()).collect();
        assert_eq!(joined, data);
    }

    #[tokio::test]
    async fn test_silent_peer_exhausts_attempts() {
        let peer_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut sender = sender_to(&peer_socket).await;
        let peer = fake_peer(peer_socket, |_, _| None);

        let outcome = sender.send_stream(&b"never acked"[..]).await.unwrap();

        assert_eq!(
            outcome,
            TransferOutcome::Abandoned {
                sequence: 1,
                attempts: 6,
                delivered_chunks: 0
            }
        );
        assert!(!outcome.is_delivered());
        assert_eq!(sender.state(), SenderState::Aborted);
        assert_eq!(sender.stats().timeouts, 6);
        assert_eq!(sender.stats().retransmissions, 5);

        // 첫 전송 + 재전송 5회, 포기 후에는 더 보내지 않는다
        let received = peer.await.unwrap();
        assert_eq!(received.len(), 6);
        assert!(received.iter().all(|d| peek_sequence(d) == Some(1)));
    }

    #[tokio::test]
    async fn test_retry_counter_resets_per_chunk() {
        let peer_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut sender = sender_to(&peer_socket).await;

        // 각 청크의 처음 5번은 무시, 마지막 허용 전송(6번째)에 ACK
        let peer = fake_peer(peer_socket, |index, d| (index % 6 == 5).then(|| d.to_vec()));

        let data = vec![b'x'; 600];
        let outcome = sender.send_stream(&data[..]).await.unwrap();

        assert_eq!(
            outcome,
            TransferOutcome::Delivered {
                chunks: 2,
                bytes: 600
            }
        );
        assert_eq!(sender.stats().retransmissions, 10);
        assert_eq!(peer.await.unwrap().len(), 12);
    }

    #[tokio::test]
    async fn test_zero_retries_sends_once() {
        let peer_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            max_retries: 0,
            ..test_config()
        };
        let mut sender = Sender::new(config, socket, peer_socket.local_addr().unwrap()).unwrap();
        let peer = fake_peer(peer_socket, |_, _| None);

        let outcome = sender.send_stream(&b"once"[..]).await.unwrap();

        assert!(matches!(outcome, TransferOutcome::Abandoned { attempts: 1, .. }));
        assert_eq!(peer.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_ack_triggers_retransmit() {
        let peer_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut sender = sender_to(&peer_socket).await;

        let peer = fake_peer(peer_socket, |index, d| {
            if index == 0 {
                let stale = Chunk::new(99, false, Bytes::new());
                Some(stale.encode(DATAGRAM_SIZE).unwrap().to_vec())
            } else {
                Some(d.to_vec())
            }
        });

        let outcome = sender.send_stream(&b"abc"[..]).await.unwrap();

        assert!(outcome.is_delivered());
        assert_eq!(sender.stats().stale_acks, 1);
        assert_eq!(sender.stats().retransmissions, 1);
        assert_eq!(peer.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_foreign_datagrams_are_not_acks() {
        let peer_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sender_addr = socket.local_addr().unwrap();
        let mut sender =
            Sender::new(test_config(), socket, peer_socket.local_addr().unwrap()).unwrap();

        // 다른 소켓이 그럴듯한 ACK 를 먼저 보낸다
        let intruder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let forged = Chunk::new(1, true, Bytes::from_static(b"hi"))
            .encode(DATAGRAM_SIZE)
            .unwrap();
        intruder.send_to(&forged, sender_addr).await.unwrap();

        let peer = fake_peer(peer_socket, |_, d| Some(d.to_vec()));
        let outcome = sender.send_stream(&b"hi"[..]).await.unwrap();

        assert!(outcome.is_delivered());
        assert_eq!(sender.stats().stale_acks, 0);
        assert_eq!(peer.await.unwrap().len(), 1);
    }
}
