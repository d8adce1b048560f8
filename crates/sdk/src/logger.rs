//! Hides events logged while a peer replays its history.
//!
//! Spans opened by the engine carry a `replay` field. Events inside a span
//! flagged `replay = true`, or inside any of its children, are filtered out.
//!
//! ```no_run
//! use kappa_rpc::logger::ReplayFilter;
//! use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};
//!
//! tracing_subscriber::registry()
//!     .with(tracing_subscriber::fmt::layer().with_filter(ReplayFilter::new()))
//!     .init();
//! ```

use std::fmt::Debug;
use tracing::{
    field::{Field, Visit},
    span::{Attributes, Record},
    Event, Id, Metadata, Subscriber,
};
use tracing_subscriber::{
    layer::{Context, Filter},
    registry::LookupSpan,
    Layer,
};

#[derive(Debug)]
struct ReplayField(bool);

struct ReplayFieldVisitor(Option<bool>);

impl Visit for ReplayFieldVisitor {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name().eq("replay") {
            self.0 = Some(value);
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn Debug) {}
}

#[derive(Debug, Default)]
pub struct ReplayFilter {}

impl ReplayFilter {
    pub fn new() -> Self {
        Self {}
    }
}

impl<S: Subscriber + for<'lookup> LookupSpan<'lookup>> Filter<S> for ReplayFilter {
    fn enabled(&self, _meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        true
    }

    fn event_enabled(&self, event: &Event<'_>, cx: &Context<'_, S>) -> bool {
        let Some(scope) = cx.event_scope(event) else {
            return true;
        };
        let replaying = scope
            .from_root()
            .any(|span| span.extensions().get::<ReplayField>().is_some_and(|replay| replay.0));
        !replaying
    }

    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = ReplayFieldVisitor(None);
        attrs.record(&mut visitor);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut()
                .insert::<ReplayField>(ReplayField(visitor.0.unwrap_or(false)));
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let mut visitor = ReplayFieldVisitor(None);
        values.record(&mut visitor);
        let (Some(replay), Some(span)) = (visitor.0, ctx.span(id)) else {
            return;
        };
        span.extensions_mut().replace::<ReplayField>(ReplayField(replay));
    }
}

impl<S: Subscriber> Layer<S> for ReplayFilter {}
