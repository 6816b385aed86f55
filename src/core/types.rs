/*!
 * Core Types
 * Common types used across the crate
 */

/// Priority level (0-255, higher is more important)
pub type Priority = u8;

/// Priority for deferrable background work
pub const PRIORITY_BACKGROUND: Priority = 10;

/// Priority for work that can tolerate delay
pub const PRIORITY_LOW: Priority = 30;

/// Baseline priority for work that requests nothing specific
pub const PRIORITY_DEFAULT: Priority = 50;

/// Priority for latency-sensitive work
pub const PRIORITY_HIGH: Priority = 70;

/// Priority for work that must preempt everything else on the queue
pub const PRIORITY_CRITICAL: Priority = 90;
