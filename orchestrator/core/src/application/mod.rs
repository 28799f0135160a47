// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent_runtime;
pub mod context;
pub mod health_monitor;
