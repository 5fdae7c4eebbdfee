#[cfg(feature = "sqs")]
mod sqs;
