/**
 * Copyright (c) 2024-2025 ArcX, Inc.
 *
 * This file is part of Revamp Proxy
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 */

pub mod context;
pub mod executor;
pub mod registry;
pub mod stats;
pub mod types;

pub use context::{Permission, PluginContext, PluginStorage};
pub use executor::{ChainOutcome, HookExecutor};
pub use registry::HookRegistry;
pub use stats::{HookStatsEntry, Outcome, PluginStats, StatsRegistry};
pub use types::{shallow_merge, HookHandler, HookName, HookRegistration, HookResult};
