use lightdip_protocol::{
    MAX_DATAGRAM_LEN, PeriodFrame, StatusFrame, decode_status_frame, encode_status_frame,
    history_datagrams,
};

fn main() {
    let history: Vec<f64> = (0..1_000).map(|i| 1.5 + (i % 50) as f64 / 1_000.0).collect();
    let status = StatusFrame {
        uptime_ms: 123_456,
        samples: history.len() as u32,
        led_hz: 42,
        avg_light_v: 1.524,
        dips: 3,
        period: Some(PeriodFrame {
            min_ms: 0.98,
            max_ms: 1.35,
            avg_ms: 1.0,
            periods: 999,
        }),
        history,
        part: 0,
        parts: 1,
        offset: 0,
    };
    let mut raw = vec![0u8; 16 * 1024];
    let len = encode_status_frame(0x42, &status, &mut raw).unwrap();
    println!("frame len {}", len);
    let (header, decoded) = decode_status_frame(&raw[..len]).unwrap();
    println!("seq {} led {} Hz dips {}", header.seq, decoded.led_hz, decoded.dips);

    let datagrams = history_datagrams(&decoded.history, MAX_DATAGRAM_LEN).unwrap();
    for (i, d) in datagrams.iter().enumerate() {
        println!("history datagram {} len {}", i, d.len());
    }
}
