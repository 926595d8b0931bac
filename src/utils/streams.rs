// src/utils/streams.rs
use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};


/// Drains an async byte source into lines.
///
/// # Arguments
///
/// * `reader` - Any AsyncRead, typically a child's stdout or stderr pipe.
///
/// # Returns
/// Vec of lines without terminators.
pub async fn read_lines<R>(reader: R) -> Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut out = Vec::new();
    while let Some(line) = lines.next_line().await? {
        out.push(line);
    }
    Ok(out)
}
