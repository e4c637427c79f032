//! Panic isolation around handler invocation.

use crate::error::{DispatchError, HandlerError};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Poll `fut` to completion, turning a panic into [`DispatchError::Panicked`].
///
/// A handler error passes through unchanged as [`DispatchError::Handler`].
pub async fn run_isolated<F>(fut: F) -> Result<(), DispatchError>
where
    F: Future<Output = Result<(), HandlerError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(DispatchError::Handler(err)),
        Err(payload) => Err(DispatchError::Panicked(panic_message(&*payload))),
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ok_passes_through() {
        assert!(run_isolated(async { Ok(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn test_handler_error_passes_through() {
        let err = run_isolated(async { Err(anyhow::anyhow!("out of stock")) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "out of stock");
        assert!(!err.is_internal());
    }

    async fn panics_with_str() -> Result<(), HandlerError> {
        panic!("boom")
    }

    async fn panics_with_string(id: u32) -> Result<(), HandlerError> {
        panic!("order {id} is corrupt")
    }

    #[tokio::test]
    async fn test_static_str_panic() {
        let err = run_isolated(panics_with_str()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Panicked(ref m) if m == "boom"));
        assert_eq!(err.to_string(), "subscriber panicked: boom");
    }

    #[tokio::test]
    async fn test_formatted_panic() {
        let err = run_isolated(panics_with_string(7)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Panicked(ref m) if m == "order 7 is corrupt"));
    }

    #[test]
    fn test_unknown_payload() {
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(&*payload), "unknown panic");
    }
}
