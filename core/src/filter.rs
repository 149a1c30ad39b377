/*
 * filter.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, an asynchronous HTTP client engine.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Request, response and I/O exception filters.
//!
//! Filters see a `FilterContext` and return a (possibly rewritten) one. Setting `replay_request`
//! asks the sender to send `request` again; for I/O exception filters the replay is still bounded
//! by the future's retry budget.

use std::sync::Arc;

use http::HeaderMap;
use thiserror::Error;

use crate::error::HttpError;
use crate::protocol::http::{HttpResponseStatus, Request};

#[derive(Debug, Error)]
#[error("{0}")]
pub struct FilterError(pub String);

/// What a filter sees and may change.
#[derive(Debug, Clone)]
pub struct FilterContext {
    pub request: Request,
    pub response_status: Option<HttpResponseStatus>,
    pub response_headers: Option<HeaderMap>,
    pub io_error: Option<Arc<HttpError>>,
    pub replay_request: bool,
}

impl FilterContext {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            response_status: None,
            response_headers: None,
            io_error: None,
            replay_request: false,
        }
    }

    pub fn with_request(mut self, request: Request) -> Self {
        self.request = request;
        self
    }

    pub fn with_replay(mut self, replay: bool) -> Self {
        self.replay_request = replay;
        self
    }
}

/// Runs before a request is dispatched.
pub trait RequestFilter: Send + Sync {
    fn filter(&self, ctx: FilterContext) -> Result<FilterContext, FilterError>;
}

/// Runs once the status line and headers of a response are known.
pub trait ResponseFilter: Send + Sync {
    fn filter(&self, ctx: FilterContext) -> Result<FilterContext, FilterError>;
}

/// Runs when a write or read fails with an I/O error.
pub trait IoExceptionFilter: Send + Sync {
    fn filter(&self, ctx: FilterContext) -> Result<FilterContext, FilterError>;
}

/// Replays the request unchanged after any I/O error.
#[derive(Debug, Default)]
pub struct ReplayOnIoErrorFilter;

impl IoExceptionFilter for ReplayOnIoErrorFilter {
    fn filter(&self, ctx: FilterContext) -> Result<FilterContext, FilterError> {
        let replay = ctx.io_error.as_ref().map(|e| e.is_io()).unwrap_or(false);
        Ok(ctx.with_replay(replay))
    }
}

/// Run `ctx` through `filters` in order.
pub(crate) fn apply<F, I>(filters: I, mut ctx: FilterContext, run: F) -> Result<FilterContext, HttpError>
where
    I: IntoIterator,
    F: Fn(&I::Item, FilterContext) -> Result<FilterContext, FilterError>,
{
    for filter in filters {
        ctx = run(&filter, ctx).map_err(|e| HttpError::Filter(e.0))?;
    }
    Ok(ctx)
}
