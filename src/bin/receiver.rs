//! SWT 수신자 - Stop-and-Wait Transfer
//!
//! 최대 5개 송신자로부터 동시에 파일을 받아 stdout 으로 출력
//! - 중복 청크는 ACK 만 재전송, 다시 출력하지 않음
//! - 6번째 동시 전송은 무시
//!
//! 사용법:
//!   swt-receiver <PORT> [OPTIONS]
//!
//! 예시:
//!   swt-receiver 9000 > received.txt
//!   RUST_LOG=debug swt-receiver 9000 --loss 0.2

use std::net::{IpAddr, SocketAddr};

use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swt::{Config, FaultPlan, FaultyTransport, Receiver};

/// 수신자 설정
struct ReceiverArgs {
    bind_ip: IpAddr,
    port: u16,
    loss_rate: f64,
    seed: u64,
    config: Config,
}

fn usage() -> ! {
    eprintln!(
        r#"SWT Receiver - Stop-and-Wait Transfer 수신자

사용법:
  swt-receiver <PORT> [OPTIONS]

옵션:
  --bind <IP>             바인드 IP (기본: 0.0.0.0)
  --sessions <N>          최대 동시 세션 수 (기본: 5)
  --datagram-size <SIZE>  데이터그램 크기 (기본: 576, 송신자와 같아야 함)
  --idle-timeout <MS>     유휴 세션 회수 시간 (기본: 0 = 회수 안 함)
  --linger <MS>           완료 세션의 마지막 ACK 기억 시간 (기본: 3000)
  --loss <RATIO>          ACK 손실 시뮬레이션 0.0~1.0 (기본: 0)
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

fn parse_args() -> ReceiverArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut port = None;
    let mut parsed = ReceiverArgs {
        bind_ip: IpAddr::from([0, 0, 0, 0]),
        port: 0,
        loss_rate: 0.0,
        seed: 0,
        config: Config::default(),
    };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--bind" => {
                parsed.bind_ip = parse_value(value);
                i += 1;
            }
            "--sessions" => {
                parsed.config.max_sessions = parse_value(value);
                i += 1;
            }
            "--datagram-size" => {
                parsed.config.datagram_size = parse_value(value);
                i += 1;
            }
            "--idle-timeout" => {
                parsed.config.session_idle_timeout_ms = parse_value(value);
                i += 1;
            }
            "--linger" => {
                parsed.config.completed_linger_ms = parse_value(value);
                i += 1;
            }
            "--loss" => {
                parsed.loss_rate = parse_value(value);
                i += 1;
            }
            "--seed" => {
                parsed.seed = parse_value(value);
                i += 1;
            }
            "--help" | "-h" => usage(),
            other => match other.parse::<u16>() {
                Ok(p) if port.is_none() => port = Some(p),
                _ => usage(),
            },
        }
        i += 1;
    }

    parsed.port = port.unwrap_or_else(|| usage());
    parsed
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (stdout 은 페이로드 전용)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args();
    let bind_addr = SocketAddr::new(args.bind_ip, args.port);

    let socket = UdpSocket::bind(bind_addr).await?;
    info!("Listening on {}", bind_addr);

    let (receiver, mut deliveries) = if args.loss_rate > 0.0 {
        info!("ACK 손실 시뮬레이션: {:.1}%", args.loss_rate * 100.0);
        let plan = FaultPlan::lossy(args.loss_rate, args.seed);
        Receiver::start(args.config, FaultyTransport::new(socket, plan))?
    } else {
        Receiver::start(args.config, socket)?
    };

    let mut stdout = tokio::io::stdout();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            delivery = deliveries.recv() => {
                let Some(delivery) = delivery else {
                    // 수신 루프 종료 (치명적 에러)
                    break;
                };

                let label = if delivery.is_last { "Last Part" } else { "Part" };
                info!(
                    "{} {} from {} ({} bytes)",
                    label,
                    delivery.sequence,
                    delivery.peer,
                    delivery.payload.len()
                );

                stdout.write_all(&delivery.payload).await?;
                stdout.flush().await?;
            }
            _ = &mut shutdown => {
                info!("종료 신호 수신");
                receiver.stop();
                break;
            }
        }
    }

    let stats = receiver.stats();
    receiver.join().await?;

    info!("{}", stats.summary());
    info!("Receiver has terminated.");
    Ok(())
}
