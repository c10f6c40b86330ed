// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Default size of a coroutine stack.
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Smallest stack we hand to a coroutine. Requests below this are rounded up.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Default number of released stacks kept around for reuse.
pub const DEFAULT_STACK_CACHE: usize = 16;

/// Default number of readiness events collected by a single poller wait.
pub const DEFAULT_POLLER_CAPACITY: usize = 1024;

/// Default number of consecutive poller failures tolerated before the run loop gives up.
pub const DEFAULT_POLL_ERROR_RETRIES: usize = 3;

/// Default number of threads in a worker pool.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Size of the scratch buffer used by the I/O helpers.
pub const RECVBUF_SIZE_MAX: usize = 8192;
