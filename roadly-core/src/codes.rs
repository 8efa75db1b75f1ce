use rand::Rng;

// No 0/O or 1/I: codes get read out over the phone at the ticket counter.
const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

pub fn booking_code() -> String {
    format!("BK{}", random_suffix(8))
}

pub fn payment_code() -> String {
    format!("PAY{}", random_suffix(10))
}
