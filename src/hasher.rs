// Zipshelf - 内容哈希模块
// 使用 XXH3 算法计算内容哈希，用于深度校验压缩包内容与源文件是否一致

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use xxhash_rust::xxh3::Xxh3;

/// 计算文件内容的 XXH3 哈希值
///
/// # 参数
/// * `path` - 要计算哈希的文件路径
///
/// # 返回
/// * `Ok(u64)` - 文件的 64 位哈希值
/// * `Err(io::Error)` - 读取文件失败
pub fn calculate_hash(path: &Path) -> io::Result<u64> {
    let file = File::open(path)?;
    // 1MB 缓冲区以提高性能
    let reader = BufReader::with_capacity(1024 * 1024, file);
    hash_reader(reader).map(|(hash, _)| hash)
}

/// 读取到末尾并计算哈希
///
/// 用于校验压缩包条目：读到末尾的同时 zip 库会校验 CRC-32。
///
/// # 返回
/// * `Ok((u64, u64))` - 哈希值和读取的字节数
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<(u64, u64)> {
    let mut hasher = Xxh3::new();
    let mut buffer = [0u8; 64 * 1024];
    let mut total = 0u64;

    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
        total += count as u64;
    }

    Ok((hasher.digest(), total))
}
