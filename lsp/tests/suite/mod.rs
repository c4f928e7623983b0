mod cancellation;
mod documents;
mod errors;
mod semantic_tokens;
