//! 对象 ID 生成与格式校验。

use rand::Rng;

use crate::config::OBJECT_ID_LEN;

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ123456789";

/// 生成一个随机对象 ID。
pub fn generate_id() -> String {
    generate_id_with(&mut rand::thread_rng())
}

pub fn generate_id_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..OBJECT_ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// 判断字符串是否可能是本服务签发的 ID。
pub fn is_well_formed(id: &str) -> bool {
    id.len() == OBJECT_ID_LEN && id.bytes().all(|b| ID_ALPHABET.contains(&b))
}
