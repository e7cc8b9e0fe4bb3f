// Storage module: MinIO object storage for cached page/map content.

pub mod minio;

pub use minio::MinioClient;
