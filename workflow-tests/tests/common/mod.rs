//! Common helpers for gate workflow tests.

use workflow_tests::GateHarness;

/// Boot a harness in active enforcement with the role bridge online.
///
/// This is the main entry point for workflow tests.
pub async fn setup() -> GateHarness {
    let harness = GateHarness::new().await.expect("failed to boot harness");
    harness
        .start_bridge()
        .await
        .expect("failed to start role bridge");
    harness
}
