//! App - 消費ループ本体
//!
//! # 主要コンポーネント
//! - **AdmissionGate**: in-flight 処理数の上限
//! - **Dispatcher**: pull → spawn のループ（idle / error backoff 付き）
//! - **process_delivery**: 1 メッセージ分の処理（ack / slot release）
//! - **BackoffPolicy**: pull 失敗時の待ち時間

pub mod backoff;
pub mod dispatch;
pub mod gate;
pub mod task;

pub use self::backoff::{Backoff, BackoffKind, BackoffPolicy};
pub use self::dispatch::{Dispatcher, StopSignal};
pub use self::gate::{AdmissionGate, Slot};
pub use self::task::{TaskContext, TaskOutcome, process_delivery};
