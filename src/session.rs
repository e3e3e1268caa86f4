//! 세션 테이블 (수신측)
//!
//! - 고정 용량 슬롯 배열, 피어 주소가 키
//! - 새 피어 + 빈 슬롯 → 세션 생성, 빈 슬롯 없음 → Rejected
//! - 마지막 청크 수락 시 슬롯 반환
//!
//! 수신 루프 하나만 접근하므로 잠금 없음

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use crate::chunk::SequenceNumber;

/// 슬롯 인덱스 핸들
///
/// 테이블 호출 사이에 세션 참조를 들고 있지 않도록 인덱스만 전달한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(usize);

impl SessionHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// 진행 중인 수신 스트림 하나
#[derive(Debug, Clone)]
pub struct Session {
    peer: SocketAddr,

    /// 다음에 수락할 시퀀스 번호 (u32 최대값 이후에도 넘치지 않도록 u64)
    next_expected: u64,

    opened_at: Instant,
    last_activity: Instant,
}

impl Session {
    fn open(peer: SocketAddr, now: Instant) -> Self {
        Self {
            peer,
            next_expected: 1,
            opened_at: now,
            last_activity: now,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// 마지막으로 수락한 시퀀스 번호
    pub fn last_accepted(&self) -> Option<SequenceNumber> {
        self.next_expected
            .checked_sub(1)
            .filter(|&seq| seq > 0)
            .and_then(|seq| SequenceNumber::try_from(seq).ok())
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// 청크 수락: 다음 기대 번호 증가
    pub fn advance(&mut self, now: Instant) {
        self.next_expected += 1;
        self.last_activity = now;
    }

    /// 중복 청크 등 활동 기록
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }
}

/// `resolve` 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// 이미 활성인 세션
    Existing(SessionHandle),

    /// 빈 슬롯에 새로 연 세션
    Opened(SessionHandle),

    /// 일치하는 세션도 빈 슬롯도 없음
    Rejected,
}

impl Resolution {
    pub fn handle(&self) -> Option<SessionHandle> {
        match self {
            Resolution::Existing(h) | Resolution::Opened(h) => Some(*h),
            Resolution::Rejected => None,
        }
    }
}

/// 완료된 세션의 흔적 (마지막 ACK 재전송용)
///
/// 시퀀스 번호만으로는 같은 피어의 새 스트림 1번 청크와 구분되지 않으므로
/// 마지막 데이터그램 전체를 기억한다.
#[derive(Debug, Clone)]
struct Completed {
    peer: SocketAddr,
    final_datagram: Bytes,
    released_at: Instant,
}

/// 세션 테이블
#[derive(Debug)]
pub struct SessionTable {
    /// None = Free, Some = Active
    slots: Vec<Option<Session>>,

    /// 최근 완료 세션 (오래된 것이 앞)
    completed: VecDeque<Completed>,

    completed_linger: Option<Duration>,
}

impl SessionTable {
    /// 새 테이블 생성
    pub fn new(capacity: usize, completed_linger: Option<Duration>) -> Self {
        Self {
            slots: vec![None; capacity],
            completed: VecDeque::new(),
            completed_linger,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// 피어의 활성 세션 찾기
    pub fn find(&self, peer: SocketAddr) -> Option<SessionHandle> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some(s) if s.peer == peer))
            .map(SessionHandle)
    }

    /// 피어 주소로 세션 조회, 없으면 첫 번째 빈 슬롯에 생성
    ///
    /// `Rejected` 인 경우 테이블은 변경되지 않는다.
    pub fn resolve(&mut self, peer: SocketAddr, now: Instant) -> Resolution {
        if let Some(handle) = self.find(peer) {
            return Resolution::Existing(handle);
        }

        let Some(index) = self.slots.iter().position(Option::is_none) else {
            return Resolution::Rejected;
        };

        self.slots[index] = Some(Session::open(peer, now));
        self.completed.retain(|c| c.peer != peer);

        debug!("세션 생성: slot={}, peer={}", index, peer);
        Resolution::Opened(SessionHandle(index))
    }

    pub fn get(&self, handle: SessionHandle) -> Option<&Session> {
        self.slots.get(handle.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, handle: SessionHandle) -> Option<&mut Session> {
        self.slots.get_mut(handle.0).and_then(Option::as_mut)
    }

    /// 슬롯 반환 (마지막 청크 수락 직후 호출)
    ///
    /// `final_datagram` 은 방금 수락한 마지막 청크의 원본 데이터그램.
    pub fn release(
        &mut self,
        handle: SessionHandle,
        final_datagram: &[u8],
        now: Instant,
    ) -> Option<Session> {
        let session = self.slots.get_mut(handle.0)?.take()?;

        if self.completed_linger.is_some() {
            // 오래된 것부터 밀어내 용량 제한
            if self.completed.len() >= self.slots.len() * 8 {
                self.completed.pop_front();
            }
            self.completed.push_back(Completed {
                peer: session.peer,
                final_datagram: Bytes::copy_from_slice(final_datagram),
                released_at: now,
            });
        }

        debug!("세션 해제: slot={}, peer={}", handle.0, session.peer);
        Some(session)
    }

    /// 방금 완료된 스트림의 마지막 청크 재전송인지 확인
    ///
    /// 마지막 ACK 가 유실된 경우 슬롯을 다시 잡지 않고 ACK 만 재전송하기 위함.
    /// 바이트 단위로 같은 데이터그램만 일치로 본다.
    pub fn is_completed_retransmit(
        &mut self,
        peer: SocketAddr,
        datagram: &[u8],
        now: Instant,
    ) -> bool {
        let Some(linger) = self.completed_linger else {
            return false;
        };

        while let Some(front) = self.completed.front() {
            if now.saturating_duration_since(front.released_at) > linger {
                self.completed.pop_front();
            } else {
                break;
            }
        }

        // 같은 피어가 새 전송을 시작했다면 세션 테이블이 우선
        if self.find(peer).is_some() {
            return false;
        }

        self.completed
            .iter()
            .any(|c| c.peer == peer && c.final_datagram.as_ref() == datagram)
    }

    /// 유휴 세션 회수, 회수된 피어 주소 반환
    pub fn reclaim_idle(&mut self, now: Instant, idle_timeout: Duration) -> Vec<SocketAddr> {
        let mut reclaimed = Vec::new();

        for slot in self.slots.iter_mut() {
            let expired = matches!(slot, Some(s) if s.idle_for(now) >= idle_timeout);
            if expired {
                if let Some(session) = slot.take() {
                    reclaimed.push(session.peer);
                }
            }
        }

        reclaimed
    }

    /// 활성 세션 목록
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.slots.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_resolve_opens_then_reuses() {
        let now = Instant::now();
        let mut table = SessionTable::new(5, None);

        let first = table.resolve(peer(1000), now);
        let handle = match first {
            Resolution::Opened(h) => h,
            other => panic!("expected Opened, got {:?}", other),
        };
        assert_eq!(table.get(handle).unwrap().next_expected(), 1);

        assert_eq!(table.resolve(peer(1000), now), Resolution::Existing(handle));
        assert_eq!(table.active_count(), 1);
    }

    #[test]
    fn test_capacity_rejects_sixth_peer_without_mutation() {
        let now = Instant::now();
        let mut table = SessionTable::new(5, None);

        for port in 1..=5 {
            assert!(matches!(table.resolve(peer(port), now), Resolution::Opened(_)));
        }
        assert!(table.is_full());

        assert_eq!(table.resolve(peer(6), now), Resolution::Rejected);
        assert_eq!(table.active_count(), 5);
        assert!(table.find(peer(6)).is_none());

        // 기존 피어는 계속 조회 가능
        assert!(matches!(table.resolve(peer(3), now), Resolution::Existing(_)));
    }

    #[test]
    fn test_release_frees_slot_for_new_peer() {
        let now = Instant::now();
        let mut table = SessionTable::new(5, None);

        let handles: Vec<_> = (1..=5)
            .map(|port| table.resolve(peer(port), now).handle().unwrap())
            .collect();

        let released = table.release(handles[2], b"last", now).unwrap();
        assert_eq!(released.peer(), peer(3));
        assert!(!table.is_full());

        let reused = table.resolve(peer(6), now);
        assert_eq!(reused, Resolution::Opened(handles[2]));
        assert_eq!(table.get(handles[2]).unwrap().next_expected(), 1);
    }

    #[test]
    fn test_advance_and_last_accepted() {
        let now = Instant::now();
        let mut table = SessionTable::new(1, None);
        let handle = table.resolve(peer(1), now).handle().unwrap();

        let session = table.get_mut(handle).unwrap();
        assert_eq!(session.last_accepted(), None);
        session.advance(now);
        session.advance(now);
        assert_eq!(session.next_expected(), 3);
        assert_eq!(session.last_accepted(), Some(2));
    }

    #[test]
    fn test_reclaim_idle_sessions() {
        let start = Instant::now();
        let mut table = SessionTable::new(2, None);

        let stale = table.resolve(peer(1), start).handle().unwrap();
        let fresh = table.resolve(peer(2), start).handle().unwrap();

        let later = start + Duration::from_secs(10);
        table.get_mut(fresh).unwrap().touch(later);

        let reclaimed = table.reclaim_idle(later, Duration::from_secs(5));
        assert_eq!(reclaimed, vec![peer(1)]);
        assert!(table.get(stale).is_none());
        assert!(table.get(fresh).is_some());
    }

    #[test]
    fn test_completed_retransmit_is_remembered() {
        let now = Instant::now();
        let mut table = SessionTable::new(1, Some(Duration::from_secs(3)));

        let handle = table.resolve(peer(1), now).handle().unwrap();
        for _ in 0..4 {
            table.get_mut(handle).unwrap().advance(now);
        }
        table.release(handle, b"chunk-4-last", now);

        assert!(table.is_completed_retransmit(peer(1), b"chunk-4-last", now));
        assert!(!table.is_completed_retransmit(peer(1), b"chunk-3", now));
        assert!(!table.is_completed_retransmit(peer(2), b"chunk-4-last", now));

        // 만료 후에는 잊는다
        let expired = now + Duration::from_secs(4);
        assert!(!table.is_completed_retransmit(peer(1), b"chunk-4-last", expired));
    }

    #[test]
    fn test_completed_forgotten_when_peer_reopens() {
        let now = Instant::now();
        let mut table = SessionTable::new(1, Some(Duration::from_secs(3)));

        let handle = table.resolve(peer(1), now).handle().unwrap();
        table.get_mut(handle).unwrap().advance(now);
        table.release(handle, b"only", now);

        assert!(table.is_completed_retransmit(peer(1), b"only", now));
        table.resolve(peer(1), now);
        assert!(!table.is_completed_retransmit(peer(1), b"only", now));
    }

    #[test]
    fn test_completed_same_sequence_new_content_is_not_retransmit() {
        let now = Instant::now();
        let mut table = SessionTable::new(1, Some(Duration::from_secs(3)));

        // 같은 피어가 한 청크짜리 스트림을 연달아 보낸 경우
        let handle = table.resolve(peer(1), now).handle().unwrap();
        table.get_mut(handle).unwrap().advance(now);
        table.release(handle, b"seq1-last-first", now);

        assert!(!table.is_completed_retransmit(peer(1), b"seq1-last-second", now));
        assert!(table.is_completed_retransmit(peer(1), b"seq1-last-first", now));
    }
}
