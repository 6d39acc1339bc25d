//! End-to-end tests for the stream adapter over TCP

use std::time::Duration;

use devsim_core::{
    Device, DeviceError, Registry, Setups, Simulation, SimulationConfig, SimulationError,
    SimulationHandle,
};
use devsim_stream::{
    CmdBuilder, Cmd, StreamAdapter, StreamError, StreamInterface, StreamOptions, Var,
};
use proptest::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

#[derive(Debug, Default)]
struct Lamp {
    level: i64,
    cycles: u64,
}

impl Device for Lamp {
    fn members() -> Registry<Self> {
        Registry::new("Lamp")
            .read_write("level", |l: &Lamp| l.level, |l, level: i64| {
                if !(0..=10).contains(&level) {
                    return Err(DeviceError::LimitViolation(format!("level {}", level)));
                }
                l.level = level;
                Ok(())
            })
            .read_only("cycles", |l: &Lamp| l.cycles)
            .method2("blend", |l: &mut Lamp, a: i64, b: i64| {
                l.level = (a + b) / 2;
                Ok(l.level)
            })
    }

    fn process(&mut self, _dt: f64) -> Result<(), DeviceError> {
        self.cycles += 1;
        Ok(())
    }
}

fn interface() -> StreamInterface<Lamp> {
    StreamInterface::new()
        .command(Var::new("level").read_scanf("L?").write_scanf("L=%d").doc("Lamp level"))
        .command(Var::new("cycles").read(r"C\?$"))
        .command(CmdBuilder::new("blend").arg_sep(",").escape("B").int().int().eos().build())
        .out_terminator("\n")
}

type Running = (SimulationHandle<Lamp>, JoinHandle<Result<(), SimulationError>>, u16);

async fn start(interface: StreamInterface<Lamp>) -> Running {
    let config = SimulationConfig {
        cycle_delay: Duration::from_millis(5),
        ..Default::default()
    };
    let mut sim = Simulation::new(Setups::new().with_default(|| Ok(Lamp::default())), config).unwrap();
    let options = StreamOptions {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
    };
    sim.add_adapter(StreamAdapter::new(interface, options).unwrap())
        .unwrap();
    let (handle, task) = sim.spawn();
    let port = port(&handle).await;
    (handle, task, port)
}

async fn port(handle: &SimulationHandle<Lamp>) -> u16 {
    let config = handle
        .execute(|s| s.adapters().configuration(&[]))
        .await
        .unwrap()
        .unwrap();
    config["stream"]["port"].as_i64().unwrap() as u16
}

async fn read_line(stream: &mut TcpStream) -> String {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    timeout(Duration::from_secs(5), async {
        loop {
            stream.read_exact(&mut byte).await.unwrap();
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
    })
    .await
    .unwrap();
    String::from_utf8(line).unwrap()
}

async fn ask(stream: &mut TcpStream, request: &[u8]) -> String {
    stream.write_all(request).await.unwrap();
    read_line(stream).await
}

#[tokio::test]
async fn test_read_write_and_method() {
    let (handle, task, port) = start(interface()).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    assert_eq!(ask(&mut stream, b"L?\r").await, "0");
    // A write produces no reply, so the next line belongs to the read
    stream.write_all(b"L=4\r").await.unwrap();
    assert_eq!(ask(&mut stream, b"L?\r").await, "4");
    assert_eq!(ask(&mut stream, b"B2,8\r").await, "5");

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_terminator_split_across_reads() {
    let (handle, task, port) = start(interface().in_terminator("\r\n")).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    stream.write_all(b"L").await.unwrap();
    sleep(Duration::from_millis(10)).await;
    stream.write_all(b"?\r").await.unwrap();
    sleep(Duration::from_millis(10)).await;
    stream.write_all(b"\n").await.unwrap();
    assert_eq!(read_line(&mut stream).await, "0");

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_two_commands_in_one_read() {
    let (handle, task, port) = start(interface()).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    stream.write_all(b"L=7\rL?\rB1,1\r").await.unwrap();
    assert_eq!(read_line(&mut stream).await, "7");
    assert_eq!(read_line(&mut stream).await, "1");

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_errors_keep_connection_open() {
    let (handle, task, port) = start(interface()).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    let reply = ask(&mut stream, b"NOPE\r").await;
    assert!(reply.contains("NOPE"), "{}", reply);
    let reply = ask(&mut stream, b"L=99\r").await;
    assert!(reply.contains("limit violation"), "{}", reply);
    assert_eq!(ask(&mut stream, b"L?\r").await, "0");

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_read_timeout_discards_partial_command() {
    let iface = interface()
        .readtimeout(Duration::from_millis(50))
        .on_error(|request, e| match e {
            StreamError::ReadTimeout(n) => Some(format!(
                "TIMEOUT {} {}",
                n,
                String::from_utf8_lossy(request)
            )),
            _ => Some("ERR".to_string()),
        });
    let (handle, task, port) = start(iface).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    stream.write_all(b"L=").await.unwrap();
    assert_eq!(read_line(&mut stream).await, "TIMEOUT 2 L=");
    // The discarded bytes do not prefix the next command
    assert_eq!(ask(&mut stream, b"L?\r").await, "0");

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_slow_sender_is_not_timed_out() {
    let iface = interface()
        .readtimeout(Duration::from_millis(80))
        .on_error(|_, _| Some("ERR".to_string()));
    let (handle, task, port) = start(iface).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    // Longer in total than the timeout, but never silent for that long
    for byte in b"B4,6" {
        stream.write_all(&[*byte]).await.unwrap();
        sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(ask(&mut stream, b"\r").await, "5");

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_silence_ends_command_without_terminator() {
    let iface = interface()
        .in_terminator("")
        .readtimeout(Duration::from_millis(30));
    let (handle, task, port) = start(iface).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    stream.write_all(b"L=").await.unwrap();
    stream.write_all(b"3").await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(ask(&mut stream, b"L?").await, "3");

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_interface_member_shadows_device() {
    let iface = StreamInterface::new()
        .members(Registry::new("LampInterface").read_only("level", |l: &Lamp| format!("LVL{}", l.level)))
        .command(Var::new("level").read_scanf("L?"))
        .out_terminator("\n");
    let (handle, task, port) = start(iface).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    assert_eq!(ask(&mut stream, b"L?\r").await, "LVL0");

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_paused_simulation_still_answers() {
    let (handle, task, port) = start(interface()).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    handle.pause().await.unwrap();
    let frozen = ask(&mut stream, b"C?\r").await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(ask(&mut stream, b"C?\r").await, frozen);

    handle.resume().await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_ne!(ask(&mut stream, b"C?\r").await, frozen);

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_disconnect_and_reconnect() {
    let (handle, task, first_port) = start(interface()).await;

    handle
        .execute(|s| s.adapters_mut().disconnect(&[]))
        .await
        .unwrap()
        .unwrap();
    let connected = handle
        .execute(|s| s.adapters().is_connected(&[]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(connected["stream"], false);
    assert!(TcpStream::connect(("127.0.0.1", first_port)).await.is_err());

    // Device state is untouched by the adapter lifecycle
    handle.with_device(|l| l.level = 6).await.unwrap();
    handle
        .execute(|s| s.adapters_mut().connect(&[]))
        .await
        .unwrap()
        .unwrap();
    let port = port(&handle).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    assert_eq!(ask(&mut stream, b"L?\r").await, "6");

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stop_closes_connections() {
    let (handle, task, port) = start(interface()).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    assert_eq!(ask(&mut stream, b"L?\r").await, "0");

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();

    let mut buf = [0u8; 8];
    let read = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_documentation_lists_patterns() {
    let iface = interface().doc("A dimmable lamp.").command(Cmd::new("cycles", "^unused$").doc("never bound"));
    // `cycles` is a property, so binding a Cmd to it fails
    assert!(StreamAdapter::new(iface, StreamOptions::default()).is_err());

    let (handle, task, _) = start(interface().doc("A dimmable lamp.")).await;
    let doc = handle
        .execute(|s| s.adapters().documentation(&[]))
        .await
        .unwrap()
        .unwrap();
    assert!(doc.contains("A dimmable lamp."));
    assert!(doc.contains("Lamp level"));
    assert!(doc.contains("L=%d  ->  level"));
    assert!(doc.contains(r"Output terminator: \n"));

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_split_point_does_not_change_replies(split in 1usize..9) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (handle, task, port) = start(interface()).await;
            let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            let request = b"L=9\rB3,5\r";
            stream.write_all(&request[..split]).await.unwrap();
            stream.flush().await.unwrap();
            sleep(Duration::from_millis(2)).await;
            stream.write_all(&request[split..]).await.unwrap();
            assert_eq!(read_line(&mut stream).await, "4");
            handle.stop().await.unwrap();
            task.await.unwrap().unwrap();
        });
    }
}
