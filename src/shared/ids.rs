use getrandom::getrandom;

const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_SPACE: u32 = 36 * 36 * 36 * 36;

fn base36_encode_u64(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_ALPHABET[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

fn base36_encode_fixed_u32(mut value: u32, width: usize) -> String {
    let mut digits = vec![b'0'; width];
    for slot in digits.iter_mut().rev() {
        *slot = BASE36_ALPHABET[(value % 36) as usize];
        value /= 36;
    }
    String::from_utf8(digits).unwrap_or_default()
}

fn generate_id(prefix: &str, now_ms: i64) -> Result<String, String> {
    let mut bytes = [0u8; 4];
    getrandom(&mut bytes)
        .map_err(|err| format!("failed to generate {prefix} id randomness: {err}"))?;
    let sample = u32::from_le_bytes(bytes) % SUFFIX_SPACE;
    let ts = base36_encode_u64(now_ms.max(0) as u64);
    let suffix = base36_encode_fixed_u32(sample, 4);
    Ok(format!("{prefix}-{ts}-{suffix}"))
}

pub fn new_run_id(now_ms: i64) -> Result<String, String> {
    generate_id("run", now_ms)
}

pub fn new_decision_id(now_ms: i64) -> Result<String, String> {
    generate_id("dec", now_ms)
}

pub fn new_receipt_id(now_ms: i64) -> Result<String, String> {
    generate_id("rcpt", now_ms)
}

pub fn new_frame_id(now_ms: i64) -> Result<String, String> {
    generate_id("frame", now_ms)
}

pub fn new_schedule_id(now_ms: i64) -> Result<String, String> {
    generate_id("sch", now_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix_and_fixed_suffix_width() {
        let id = new_run_id(1_700_000_000_000).expect("run id");
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "run");
        assert_eq!(parts[2].len(), 4);
    }

    #[test]
    fn base36_round_trips_known_values() {
        assert_eq!(base36_encode_u64(0), "0");
        assert_eq!(base36_encode_u64(35), "z");
        assert_eq!(base36_encode_u64(36), "10");
        assert_eq!(base36_encode_fixed_u32(0, 4), "0000");
    }
}
