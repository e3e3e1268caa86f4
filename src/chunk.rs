//! 청크 정의와 와이어 코덱
//!
//! 데이터그램 구조 (고정 크기 D, 기본 576):
//! - 0..4   : sequence number (big-endian u32, 1부터 시작)
//! - 4..8   : last flag (big-endian u32, 0 또는 1)
//! - 8..D   : payload (마지막 청크는 0으로 패딩)
//!
//! ACK 데이터그램도 같은 형식/크기를 사용한다.

use bincode::Options;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Error, Result, HEADER_SIZE};

/// 시퀀스 번호 (32비트, 스트림별 1부터 증가)
pub type SequenceNumber = u32;

/// 헤더 인코딩 옵션: 고정 폭 정수, 네트워크 바이트 순서
fn header_codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

/// 청크 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkHeader {
    /// 시퀀스 번호
    pub sequence: SequenceNumber,

    /// 마지막 청크 플래그 (0/1)
    pub last: u32,
}

impl ChunkHeader {
    pub fn new(sequence: SequenceNumber, is_last: bool) -> Self {
        Self {
            sequence,
            last: u32::from(is_last),
        }
    }

    pub fn is_last(&self) -> bool {
        self.last == 1
    }

    /// 헤더를 버퍼 앞 8바이트에 기록
    fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        header_codec().serialize_into(&mut buf[..HEADER_SIZE], self)?;
        Ok(())
    }

    /// 버퍼 앞 8바이트에서 헤더 파싱 (값 검증 포함)
    fn read_from(buf: &[u8]) -> Result<Self> {
        let header: ChunkHeader = header_codec().deserialize(&buf[..HEADER_SIZE])?;

        if header.sequence == 0 {
            return Err(Error::InvalidSequence);
        }
        if header.last > 1 {
            return Err(Error::InvalidFlag { value: header.last });
        }

        Ok(header)
    }
}

/// 크기 검증 없이 시퀀스 번호만 읽기 (시뮬레이터용)
pub fn peek_sequence(datagram: &[u8]) -> Option<SequenceNumber> {
    let bytes: [u8; 4] = datagram.get(..4)?.try_into().ok()?;
    Some(SequenceNumber::from_be_bytes(bytes))
}

/// 청크 (전송 단위)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 청크 헤더
    pub header: ChunkHeader,

    /// 실제 데이터 (패딩 제외)
    pub payload: Bytes,
}

impl Chunk {
    /// 새 청크 생성
    pub fn new(sequence: SequenceNumber, is_last: bool, payload: Bytes) -> Self {
        Self {
            header: ChunkHeader::new(sequence, is_last),
            payload,
        }
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.header.sequence
    }

    pub fn is_last(&self) -> bool {
        self.header.is_last()
    }

    /// 고정 크기 데이터그램으로 직렬화
    pub fn encode(&self, datagram_size: usize) -> Result<Bytes> {
        let capacity = datagram_size.saturating_sub(HEADER_SIZE);
        if datagram_size <= HEADER_SIZE || self.payload.len() > capacity {
            return Err(Error::PayloadTooLarge {
                len: self.payload.len(),
                capacity,
            });
        }

        let mut buf = BytesMut::with_capacity(datagram_size);
        buf.resize(datagram_size, 0);

        self.header.write_to(&mut buf)?;
        buf[HEADER_SIZE..HEADER_SIZE + self.payload.len()].copy_from_slice(&self.payload);

        Ok(buf.freeze())
    }

    /// 데이터그램에서 청크 역직렬화
    ///
    /// 크기가 정확히 `datagram_size` 가 아니면 실패한다.
    /// 마지막 청크는 뒤쪽 0 패딩을 잘라낸다.
    pub fn decode(datagram: &[u8], datagram_size: usize) -> Result<Self> {
        if datagram.len() != datagram_size || datagram_size <= HEADER_SIZE {
            return Err(Error::MalformedDatagram {
                expected: datagram_size,
                got: datagram.len(),
            });
        }

        let header = ChunkHeader::read_from(datagram)?;
        let body = &datagram[HEADER_SIZE..];

        let payload = if header.is_last() {
            let end = body.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            Bytes::copy_from_slice(&body[..end])
        } else {
            Bytes::copy_from_slice(body)
        };

        Ok(Self { header, payload })
    }
}

/// 바이트 스트림을 청크로 분할 (송신측)
///
/// 꽉 찬 청크를 읽은 직후 EOF 이면 빈 마지막 청크가 하나 더 나온다.
pub struct ChunkReader<R> {
    reader: R,
    capacity: usize,
    next_sequence: Option<SequenceNumber>,
    finished: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(reader: R, capacity: usize) -> Self {
        Self {
            reader,
            capacity,
            next_sequence: Some(1),
            finished: false,
        }
    }

    /// 다음 청크 읽기. 스트림이 끝나면 `None`
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.finished {
            return Ok(None);
        }

        let sequence = self.next_sequence.ok_or(Error::SequenceExhausted)?;

        let mut buf = BytesMut::with_capacity(self.capacity);
        buf.resize(self.capacity, 0);

        // 짧은 읽기가 EOF 를 뜻하지 않으므로 꽉 차거나 0 이 나올 때까지 반복
        let mut filled = 0;
        while filled < self.capacity {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);

        let is_last = filled < self.capacity;
        if is_last {
            self.finished = true;
        }
        self.next_sequence = sequence.checked_add(1);

        Ok(Some(Chunk::new(sequence, is_last, buf.freeze())))
    }
}
