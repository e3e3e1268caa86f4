//! SWT 송신자 - Stop-and-Wait Transfer
//!
//! 파일을 576 바이트 데이터그램으로 나눠 전송
//! - 청크마다 ACK 대기 (500ms), 재전송 5회까지 모두 실패하면 포기
//!
//! 사용법:
//!   swt-sender <HOST> <PORT> <FILE> [OPTIONS]
//!
//! 예시:
//!   swt-sender localhost 9000 notes.txt
//!   swt-sender 192.168.0.10 9000 data.bin --timeout 1000 --retries 10

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tokio::net::UdpSocket;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use swt::{
    ephemeral_bind_addr, resolve_peer, Config, FaultPlan, FaultyTransport, Sender, SenderStats,
    TransferOutcome, Transport,
};

/// 송신자 설정
struct SenderArgs {
    host: String,
    port: u16,
    file_path: PathBuf,
    loss_rate: f64,
    seed: u64,
    config: Config,
}

fn usage() -> ! {
    eprintln!(
        r#"SWT Sender - Stop-and-Wait Transfer 송신자

사용법:
  swt-sender <HOST> <PORT> <FILE> [OPTIONS]

옵션:
  --timeout <MS>          ACK 대기 시간 (기본: 500)
  --retries <N>           청크당 최대 재전송 횟수 (기본: 5)
  --datagram-size <SIZE>  데이터그램 크기 (기본: 576, 수신자와 같아야 함)
  --loss <RATIO>          청크 손실 시뮬레이션 0.0~1.0 (기본: 0)
  --seed <N>              손실 시뮬레이션 시드 (기본: 0)
  -h, --help              이 도움말 출력
"#
    );
    std::process::exit(2);
}

/// 옵션 값 파싱, 없거나 잘못되면 사용법 출력 후 종료
fn parse_value<T: std::str::FromStr>(value: Option<&String>) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or_else(|| usage())
}

fn parse_args() -> SenderArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut positional = Vec::new();
    let mut loss_rate = 0.0;
    let mut seed = 0;
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--timeout" => {
                config.ack_timeout_ms = parse_value(value);
                i += 1;
            }
            "--retries" => {
                config.max_retries = parse_value(value);
                i += 1;
            }
            "--datagram-size" => {
                config.datagram_size = parse_value(value);
                i += 1;
            }
            "--loss" => {
                loss_rate = parse_value(value);
                i += 1;
            }
            "--seed" => {
                seed = parse_value(value);
                i += 1;
            }
            "--help" | "-h" => usage(),
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let [host, port, file] = <[String; 3]>::try_from(positional).unwrap_or_else(|_| usage());

    SenderArgs {
        host,
        port: port.parse().unwrap_or_else(|_| usage()),
        file_path: PathBuf::from(file),
        loss_rate,
        seed,
        config,
    }
}

async fn run<T: Transport>(
    config: Config,
    transport: T,
    peer: SocketAddr,
    file_path: &Path,
) -> swt::Result<(TransferOutcome, SenderStats)> {
    let file = tokio::fs::File::open(file_path).await?;
    let mut sender = Sender::new(config, transport, peer)?;
    let outcome = sender.send_stream(file).await?;
    Ok((outcome, sender.stats().clone()))
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // 로깅 설정
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args();

    // IPv6 전용 호스트도 허용, 소켓은 같은 주소 계열로 바인딩
    let peer = resolve_peer(&args.host, args.port).await?;
    let socket = UdpSocket::bind(ephemeral_bind_addr(peer)).await?;
    info!("Sending {:?} to {} from {}", args.file_path, peer, socket.local_addr()?);

    let transfer = async {
        if args.loss_rate > 0.0 {
            info!("청크 손실 시뮬레이션: {:.1}%", args.loss_rate * 100.0);
            let plan = FaultPlan::lossy(args.loss_rate, args.seed);
            let transport = FaultyTransport::new(socket, plan);
            run(args.config.clone(), transport, peer, &args.file_path).await
        } else {
            run(args.config.clone(), socket, peer, &args.file_path).await
        }
    };

    tokio::select! {
        result = transfer => {
            let (outcome, stats) = result?;
            info!("{}", stats.summary());

            match outcome {
                TransferOutcome::Delivered { chunks, bytes } => {
                    info!("전달 완료: {} 청크, {} bytes", chunks, bytes);
                    Ok(ExitCode::SUCCESS)
                }
                TransferOutcome::Abandoned { sequence, attempts, delivered_chunks } => {
                    error!(
                        "전송 포기: 청크 {} 에서 {}회 전송 모두 응답 없음 ({} 청크까지 전달됨)",
                        sequence, attempts, delivered_chunks
                    );
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            error!("사용자 중단");
            Ok(ExitCode::from(130))
        }
    }
}
