use lightdip_protocol::{StatusFrame, encode_status_frame};

fn main() {
    let status = StatusFrame {
        uptime_ms: 5_000,
        samples: 3,
        led_hz: 10,
        avg_light_v: 1.2,
        dips: 1,
        period: None,
        history: vec![1.1, 1.2, 1.3],
        part: 0,
        parts: 1,
        offset: 0,
    };
    let mut raw = [0u8; 256];
    let len = encode_status_frame(0x63, &status, &mut raw).unwrap();
    println!("frame len {}", len);
    for (i, b) in raw[..len].iter().enumerate() {
        print!("{:02x} ", b);
        if (i + 1) % 16 == 0 {
            println!();
        }
    }
    println!();
    println!("payload len {}", u16::from_le_bytes([raw[4], raw[5]]));
}
