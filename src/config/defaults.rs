//! Default values for configuration

/// Default vector store URL for local development
pub fn default_store_url() -> String {
    std::env::var("ARCHIVIST_STORE_URL").unwrap_or_else(|_| "http://127.0.0.1:8000".to_string())
}

/// Default environment variable name for the vector store API key
pub fn default_store_api_key_env() -> String {
    "ARCHIVIST_STORE_API_KEY".to_string()
}

/// Default collection name for document chunks
pub fn default_collection_name() -> String {
    "archivist_chunks".to_string()
}

/// Default embedding backend URL
pub fn default_embedding_backend_url() -> String {
    std::env::var("ARCHIVIST_EMBEDDING_URL").unwrap_or_else(|_| "http://127.0.0.1:7997".to_string())
}

/// Default embedding model (BAAI/bge-small-en-v1.5)
pub fn default_embedding_model() -> String {
    "BAAI/bge-small-en-v1.5".to_string()
}

/// Default embedding dimension for bge-small-en-v1.5
pub fn default_embedding_dimension() -> usize {
    384
}

/// Default maximum items per embedding provider call
pub fn default_max_items_per_batch() -> usize {
    64
}

/// Default maximum estimated tokens per embedding provider call
pub fn default_max_tokens_per_batch() -> usize {
    8000
}

/// Default embedding request timeout in seconds
pub fn default_embedding_timeout() -> u64 {
    120
}

/// Default maximum characters per chunk
pub fn default_chunk_max_chars() -> usize {
    2000
}

/// Default overlap characters between chunks
pub fn default_chunk_overlap() -> usize {
    200
}

/// Default include patterns for repository ingestion (leaf filenames only)
pub fn default_include_patterns() -> Vec<String> {
    [
        "*.rs", "*.py", "*.js", "*.ts", "*.tsx", "*.jsx", "*.go", "*.java", "*.c", "*.h",
        "*.cpp", "*.hpp", "*.cs", "*.rb", "*.php", "*.swift", "*.kt", "*.scala", "*.sh",
        "*.md", "*.txt", "*.rst", "*.toml", "*.yaml", "*.yml", "*.json", "*.html", "*.css",
        "*.sql",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Default number of files per relational commit batch
pub fn default_commit_batch_size() -> usize {
    8
}

/// Default number of chunks per vector store upsert slice
pub fn default_upsert_batch_size() -> usize {
    64
}

/// Default attempt count for busy/locked database retries
pub fn default_busy_max_attempts() -> u32 {
    5
}

/// Default base backoff in milliseconds between busy retries
pub fn default_busy_backoff_ms() -> u64 {
    50
}

/// Default number of query results
pub fn default_query_k() -> usize {
    10
}

/// Default maximum query results
pub fn default_query_max_results() -> usize {
    100
}
