// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Flow control helpers.

pub mod rate_limiter;
