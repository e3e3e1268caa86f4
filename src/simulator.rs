//! 결함 주입 네트워크 시뮬레이터
//!
//! 임의의 [`Transport`] 를 감싸 송신 경로에 손실/중복을 주입한다.
//! 양쪽 끝을 각각 감싸면 양방향 결함이 된다.
//!
//! | 결함 | 설명 |
//! |------|------|
//! | 손실 | `loss_rate` 확률로 데이터그램 폐기 |
//! | 중복 | `duplicate_rate` 확률로 두 번 전송 |
//! | 예약 손실 | `drop_once` 에 있는 시퀀스 번호의 첫 데이터그램 폐기 |

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::chunk::{peek_sequence, SequenceNumber};
use crate::transport::Transport;

/// 결함 모델
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// 손실 확률 (0.0 ~ 1.0)
    pub loss_rate: f64,

    /// 중복 확률 (0.0 ~ 1.0)
    pub duplicate_rate: f64,

    /// RNG 시드 (재현 가능한 실패를 위해)
    pub seed: u64,

    /// 한 번만 폐기할 시퀀스 번호
    pub drop_once: Vec<SequenceNumber>,
}

impl FaultPlan {
    /// 무작위 손실만 있는 모델
    pub fn lossy(loss_rate: f64, seed: u64) -> Self {
        Self {
            loss_rate,
            seed,
            ..Self::default()
        }
    }

    /// 지정한 시퀀스 번호를 각각 한 번씩만 폐기
    pub fn drop_once(sequences: impl IntoIterator<Item = SequenceNumber>) -> Self {
        Self {
            drop_once: sequences.into_iter().collect(),
            ..Self::default()
        }
    }
}

enum Fate {
    Drop,
    Deliver,
    Duplicate,
}

struct FaultState {
    rng: StdRng,
    pending_drops: HashSet<SequenceNumber>,
    dropped: u64,
    duplicated: u64,
}

/// 결함 주입 전송 래퍼
pub struct FaultyTransport<T> {
    inner: T,
    loss_rate: f64,
    duplicate_rate: f64,
    state: Mutex<FaultState>,
}

impl<T: Transport> FaultyTransport<T> {
    pub fn new(inner: T, plan: FaultPlan) -> Self {
        Self {
            inner,
            loss_rate: plan.loss_rate.clamp(0.0, 1.0),
            duplicate_rate: plan.duplicate_rate.clamp(0.0, 1.0),
            state: Mutex::new(FaultState {
                rng: StdRng::seed_from_u64(plan.seed),
                pending_drops: plan.drop_once.into_iter().collect(),
                dropped: 0,
                duplicated: 0,
            }),
        }
    }

    /// 지금까지 폐기한 데이터그램 수
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }

    /// 지금까지 중복 전송한 데이터그램 수
    pub fn duplicated(&self) -> u64 {
        self.state.lock().duplicated
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn decide(&self, buf: &[u8]) -> Fate {
        let mut state = self.state.lock();

        if let Some(sequence) = peek_sequence(buf) {
            if state.pending_drops.remove(&sequence) {
                state.dropped += 1;
                return Fate::Drop;
            }
        }

        if self.loss_rate > 0.0 && state.rng.gen_bool(self.loss_rate) {
            state.dropped += 1;
            return Fate::Drop;
        }

        if self.duplicate_rate > 0.0 && state.rng.gen_bool(self.duplicate_rate) {
            state.duplicated += 1;
            return Fate::Duplicate;
        }

        Fate::Deliver
    }
}

#[async_trait]
impl<T: Transport> Transport for FaultyTransport<T> {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        match self.decide(buf) {
            Fate::Drop => {
                trace!("시뮬레이터: 데이터그램 폐기 -> {}", target);
                // 손실은 송신자에게 보이지 않는다
                Ok(buf.len())
            }
            Fate::Deliver => self.inner.send_to(buf, target).await,
            Fate::Duplicate => {
                trace!("시뮬레이터: 데이터그램 중복 -> {}", target);
                self.inner.send_to(buf, target).await?;
                self.inner.send_to(buf, target).await
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::net::UdpSocket;

    async fn pair(plan: FaultPlan) -> (FaultyTransport<UdpSocket>, UdpSocket) {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (FaultyTransport::new(a, plan), b)
    }

    async fn drain(socket: &UdpSocket) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        while let Ok(Ok((len, _))) =
            tokio::time::timeout(Duration::from_millis(100), socket.recv_from(&mut buf)).await
        {
            out.push(buf[..len].to_vec());
        }
        out
    }

    #[tokio::test]
    async fn test_drop_once_only_drops_first_copy() {
        let (faulty, b) = pair(FaultPlan::drop_once([2])).await;
        let target = b.local_addr().unwrap();

        for seq in [1u32, 2, 2, 3] {
            faulty.send_to(&seq.to_be_bytes(), target).await.unwrap();
        }

        let received = drain(&b).await;
        let sequences: Vec<u32> = received.iter().filter_map(|d| peek_sequence(d)).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(faulty.dropped(), 1);
    }

    #[tokio::test]
    async fn test_full_loss_drops_everything() {
        let (faulty, b) = pair(FaultPlan::lossy(1.0, 7)).await;
        let target = b.local_addr().unwrap();

        for seq in 1u32..=5 {
            faulty.send_to(&seq.to_be_bytes(), target).await.unwrap();
        }

        assert!(drain(&b).await.is_empty());
        assert_eq!(faulty.dropped(), 5);
    }

    #[tokio::test]
    async fn test_full_duplication_doubles_datagrams() {
        let plan = FaultPlan {
            duplicate_rate: 1.0,
            ..FaultPlan::default()
        };
        let (faulty, b) = pair(plan).await;
        let target = b.local_addr().unwrap();

        faulty.send_to(&9u32.to_be_bytes(), target).await.unwrap();

        assert_eq!(drain(&b).await.len(), 2);
        assert_eq!(faulty.duplicated(), 1);
    }
}
