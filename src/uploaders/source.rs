use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use bytes::Bytes;
use futures::stream;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use crate::core::{PartBody, Result, UploadError, VideoFile};

/// 读取时每块的大小，块越小进度越细
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// 视频字节的来源
#[derive(Debug, Clone)]
pub enum ByteSource {
    /// 本地文件
    File(PathBuf),
    /// 内存中的数据
    Memory(Bytes),
}

impl ByteSource {
    /// 可读取的总字节数
    pub async fn len(&self) -> Result<u64> {
        match self {
            ByteSource::File(path) => Ok(tokio::fs::metadata(path).await?.len()),
            ByteSource::Memory(bytes) => Ok(bytes.len() as u64),
        }
    }

    /// 以流的形式读取 `[start, end)`，每次重试都会重新打开
    pub async fn open_range(&self, range: Range<u64>) -> Result<PartBody> {
        let length = range.end.saturating_sub(range.start);

        match self {
            ByteSource::File(path) => {
                let mut file = File::open(path).await?;
                file.seek(SeekFrom::Start(range.start)).await?;
                let reader = file.take(length);

                Ok(Box::pin(ReaderStream::with_capacity(reader, STREAM_CHUNK_SIZE)))
            }
            ByteSource::Memory(bytes) => {
                if range.end > bytes.len() as u64 {
                    return Err(UploadError::InvalidFile(format!(
                        "range {}..{} exceeds buffer of {} bytes",
                        range.start,
                        range.end,
                        bytes.len()
                    )));
                }

                let slice = bytes.slice(range.start as usize..range.end as usize);
                let chunks: Vec<std::io::Result<Bytes>> = (0..slice.len())
                    .step_by(STREAM_CHUNK_SIZE)
                    .map(|offset| {
                        let end = (offset + STREAM_CHUNK_SIZE).min(slice.len());
                        Ok(slice.slice(offset..end))
                    })
                    .collect();

                Ok(Box::pin(stream::iter(chunks)))
            }
        }
    }
}

impl VideoFile {
    /// 从本地文件构建，大小取自文件元数据
    pub async fn from_path(path: impl AsRef<Path>, mime_type: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(UploadError::InvalidFile(format!("{} is not a file", path.display())));
        }

        Ok(Self {
            path: path.to_string_lossy().to_string(),
            mime_type: mime_type.into(),
            size: metadata.len(),
            title: None,
            description: None,
            source: ByteSource::File(path.to_path_buf()),
        })
    }

    /// 内存数据，主要用于测试和小文件
    pub fn from_bytes(path: impl Into<String>, mime_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
            size: bytes.len() as u64,
            title: None,
            description: None,
            source: ByteSource::Memory(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn collect(body: PartBody) -> Vec<u8> {
        let chunks: Vec<Bytes> = body.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn test_memory_range() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let source = ByteSource::Memory(Bytes::from(data.clone()));

        let read = collect(source.open_range(70_000..150_000).await.unwrap()).await;
        assert_eq!(read, data[70_000..150_000]);
        assert!(source.open_range(0..200_001).await.is_err());
    }

    #[tokio::test]
    async fn test_file_range() {
        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 241) as u8).collect();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        tokio::fs::write(&path, &data).await.unwrap();

        let video = VideoFile::from_path(&path, "video/mp4").await.unwrap();
        assert_eq!(video.size, 300_000);
        assert_eq!(video.file_name(), "clip.mp4");
        assert_eq!(video.title(), "clip");

        let read = collect(video.source.open_range(100_000..300_000).await.unwrap()).await;
        assert_eq!(read, data[100_000..]);
    }
}
