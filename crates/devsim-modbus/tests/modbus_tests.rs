//! Modbus adapter tests against a running simulation

use std::time::Duration;

use devsim_core::{Device, DeviceError, Registry, Setups, Simulation, SimulationConfig};
use devsim_modbus::{
    DataBank, ExceptionCode, ModbusAdapter, ModbusLayout, ModbusOptions, ModbusProtocol,
    ModbusTcpFrame,
};
use proptest::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const LEVEL: u16 = 0;
const SETPOINT: u16 = 0;

/// Fills towards the setpoint by one unit per cycle
struct Tank {
    inputs: DataBank,
    holding: DataBank,
}

impl Device for Tank {
    fn members() -> Registry<Self> {
        Registry::new("Tank").read_only("level", |t: &Tank| t.inputs.word(LEVEL).unwrap_or(0))
    }

    fn process(&mut self, _dt: f64) -> Result<(), DeviceError> {
        let level = self.inputs.word(LEVEL).unwrap_or(0);
        let setpoint = self.holding.word(SETPOINT).unwrap_or(0);
        let next = match level.cmp(&setpoint) {
            std::cmp::Ordering::Less => level + 1,
            std::cmp::Ordering::Greater => level - 1,
            std::cmp::Ordering::Equal => level,
        };
        self.inputs.set_word(LEVEL, next);
        Ok(())
    }
}

fn layout() -> ModbusLayout {
    let bits = DataBank::new(0, 15, 0).unwrap();
    ModbusLayout::new(
        bits.clone(),
        bits,
        DataBank::new(0, 7, 0).unwrap(),
        DataBank::new(0, 7, 0).unwrap(),
    )
}

fn frame(tid: u16, function_code: u8, data: &[u8]) -> Vec<u8> {
    ModbusTcpFrame {
        transaction_id: tid,
        protocol_id: 0,
        unit_id: 1,
        function_code,
        data: data.to_vec(),
    }
    .encode()
}

async fn roundtrip(stream: &mut TcpStream, request: &[u8]) -> ModbusTcpFrame {
    stream.write_all(request).await.unwrap();
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 256];
    timeout(Duration::from_secs(5), async {
        loop {
            if let Some(frame) = ModbusTcpFrame::decode(&mut buffer).unwrap() {
                return frame;
            }
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed");
            buffer.extend_from_slice(&chunk[..n]);
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_device_and_client_share_banks() {
    let layout = layout();
    let device_banks = layout.clone();
    let setups = Setups::new().with_default(move || {
        Ok(Tank {
            inputs: device_banks.ir.clone(),
            holding: device_banks.hr.clone(),
        })
    });
    let config = SimulationConfig {
        cycle_delay: Duration::from_millis(2),
        ..Default::default()
    };
    let mut sim = Simulation::new(setups, config).unwrap();
    let options = ModbusOptions {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
    };
    sim.add_adapter(ModbusAdapter::new(layout, options)).unwrap();
    let (handle, task) = sim.spawn();

    let config = handle
        .execute(|s| s.adapters().configuration(&["modbus".to_string()]))
        .await
        .unwrap()
        .unwrap();
    let port = config["modbus"]["port"].as_i64().unwrap() as u16;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    // Setpoint 5 via write single register
    let response = roundtrip(&mut stream, &frame(1, 0x06, &[0, 0, 0, 5])).await;
    assert_eq!(response.data, vec![0, 0, 0, 5]);

    let mut level = 0;
    for _ in 0..100 {
        sleep(Duration::from_millis(5)).await;
        let response = roundtrip(&mut stream, &frame(2, 0x04, &[0, 0, 0, 1])).await;
        level = u16::from_be_bytes([response.data[1], response.data[2]]);
        if level == 5 {
            break;
        }
    }
    assert_eq!(level, 5);

    // Out of range address keeps the connection usable
    let response = roundtrip(&mut stream, &frame(3, 0x03, &[0, 7, 0, 2])).await;
    assert_eq!(response.transaction_id, 3);
    assert_eq!(response.exception_code(), Some(ExceptionCode::IllegalDataAddress));

    let response = roundtrip(&mut stream, &frame(4, 0x07, &[])).await;
    assert_eq!(response.exception_code(), Some(ExceptionCode::IllegalFunction));

    // Coils overlay discrete inputs
    roundtrip(&mut stream, &frame(5, 0x05, &[0, 3, 0xFF, 0x00])).await;
    let response = roundtrip(&mut stream, &frame(6, 0x02, &[0, 0, 0, 4])).await;
    assert_eq!(response.data, vec![1, 0b1000]);

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

fn requests() -> Vec<u8> {
    let mut bytes = frame(10, 0x10, &[0, 1, 0, 2, 4, 0x12, 0x34, 0x56, 0x78]);
    bytes.extend(frame(11, 0x03, &[0, 0, 0, 4]));
    bytes.extend(frame(12, 0x0F, &[0, 0, 0, 3, 1, 0b101]));
    bytes.extend(frame(13, 0x01, &[0, 0, 0, 3]));
    bytes
}

proptest! {
    #[test]
    fn prop_split_point_does_not_change_responses(split in 0usize..=60) {
        let bytes = requests();
        let split = split.min(bytes.len());

        let reference = ModbusProtocol::new().process(&bytes, &layout());

        let banks = layout();
        let mut protocol = ModbusProtocol::new();
        let mut responses = protocol.process(&bytes[..split], &banks);
        responses.extend(protocol.process(&bytes[split..], &banks));

        prop_assert_eq!(responses, reference);
        prop_assert_eq!(protocol.buffered(), 0);
    }

    #[test]
    fn prop_register_quantity_limits(quantity in 0u16..=200) {
        let banks = ModbusLayout::default();
        let qty = quantity.to_be_bytes();
        let response = ModbusProtocol::new()
            .process(&frame(1, 0x03, &[0, 0, qty[0], qty[1]]), &banks);
        let mut buffer = response[0].clone();
        let decoded = ModbusTcpFrame::decode(&mut buffer).unwrap().unwrap();
        if (1..=125).contains(&quantity) {
            prop_assert_eq!(decoded.data.len(), 1 + 2 * usize::from(quantity));
        } else {
            prop_assert_eq!(decoded.exception_code(), Some(ExceptionCode::IllegalDataValue));
        }
    }
}
