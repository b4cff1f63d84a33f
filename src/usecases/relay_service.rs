//! Relay service: the per-event pipeline.
//!
//! Received -> Filtered -> EditCheck -> {Rendered, Formatted, Sent} x N -> Committed.
//! Sends for one event run concurrently; each destination is serialized by
//! the delivery service.

use crate::domain::{Attachment, ChatInfo, DomainError, InboundEvent, Listener, Message};
use crate::ports::{
    FingerprintStore, MirrorPort, MirroredMessage, MirroredReply, TgGateway, UpdateHandler,
    WebhookPort,
};
use crate::shared::RecentSet;
use crate::shared::config::RelayConfig;
use crate::usecases::attachments::AttachmentCollector;
use crate::usecases::delivery::{DeliveryService, redact};
use crate::usecases::edit_guard::EditGuard;
use crate::usecases::error_reporter::{ErrorReport, ErrorReporter};
use crate::usecases::formatter::{FormatInput, Formatter};
use crate::usecases::matcher::{self, ListenerMatcher, Route, RouteContext};
use crate::usecases::renderer::{RenderRules, render};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Identity of one update delivery.
type EventKey = (i64, i32, bool, Option<i64>);

pub struct RelayService {
    tg: Arc<dyn TgGateway>,
    matcher: ListenerMatcher,
    /// Compiled rules, indexed like the listeners.
    rules: Vec<RenderRules>,
    guard: EditGuard,
    formatter: Formatter,
    delivery: Arc<DeliveryService>,
    attachments: AttachmentCollector,
    mirror: Option<Arc<dyn MirrorPort>>,
    reporter: Option<Arc<ErrorReporter>>,
    recent: Mutex<RecentSet<EventKey>>,
}

impl RelayService {
    pub fn new(
        config: RelayConfig,
        tg: Arc<dyn TgGateway>,
        webhook: Arc<dyn WebhookPort>,
        store: Arc<dyn FingerprintStore>,
        recent_capacity: usize,
    ) -> Result<Self, DomainError> {
        let settings = &config.messages;
        let rules = config
            .listeners
            .iter()
            .map(|l| RenderRules::for_listener(l, settings))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            attachments: AttachmentCollector::new(
                Arc::clone(&tg),
                settings.attachments.ignore.clone(),
            ),
            formatter: Formatter::new(settings.max_length),
            matcher: ListenerMatcher::new(config.listeners, settings),
            rules,
            guard: EditGuard::new(store),
            delivery: Arc::new(DeliveryService::new(webhook)),
            mirror: None,
            reporter: None,
            recent: Mutex::new(RecentSet::new(recent_capacity)),
            tg,
        })
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn MirrorPort>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// First sighting of this update? Telegram redelivers on reconnect.
    fn is_fresh(&self, key: EventKey) -> bool {
        match self.recent.lock() {
            Ok(mut recent) => recent.insert(key),
            // Poisoned only if a holder panicked mid-insert; the set is still usable.
            Err(poisoned) => poisoned.into_inner().insert(key),
        }
    }

    async fn report(&self, origin: String, err: &DomainError) {
        error!(origin = %origin, error = %err, "relay error");
        if let Some(reporter) = &self.reporter {
            reporter.report(ErrorReport::from_error(origin, err)).await;
        }
    }

    /// Process one new or edited message end to end.
    pub async fn process_message(
        &self,
        chat_id: i64,
        message_id: i32,
        is_edit: bool,
        edit_date: Option<DateTime<Utc>>,
    ) -> Result<(), DomainError> {
        let key = (chat_id, message_id, is_edit, edit_date.map(|d| d.timestamp()));
        if !self.is_fresh(key) {
            debug!(chat_id, msg_id = message_id, is_edit, "duplicate update; skipping");
            return Ok(());
        }

        let Some(mut message) = self
            .tg
            .get_messages(chat_id, &[message_id])
            .await?
            .into_iter()
            .next()
        else {
            debug!(chat_id, msg_id = message_id, "message no longer available");
            return Ok(());
        };
        message.is_edit = is_edit;

        let candidates = self.matcher.prefilter(&message);
        if candidates.is_empty() {
            return Ok(());
        }

        if !self
            .guard
            .should_process(is_edit, chat_id, message_id, &message.raw_text)
            .await
        {
            return Ok(());
        }

        let chat = self.tg.get_chat(chat_id).await?;
        let (reply, topic) = self.fetch_context(&message, &chat, &candidates).await;
        let routes = self.matcher.route(
            &candidates,
            &RouteContext {
                message: &message,
                chat: &chat,
                reply: reply.as_ref(),
                topic: topic.as_ref(),
            },
        );
        if routes.is_empty() {
            debug!(chat_id, msg_id = message_id, "no listener matched");
            return Ok(());
        }

        info!(
            chat_id,
            msg_id = message_id,
            is_edit,
            listeners = routes.len(),
            "relaying message"
        );

        let files = Arc::new(self.attachments.collect(&message).await);
        let mut sends = JoinSet::new();
        for route in &routes {
            self.dispatch(&mut sends, route, &message, &chat, reply.as_ref(), &files)
                .await;
        }
        while let Some(joined) = sends.join_next().await {
            if let Err(e) = joined {
                error!(chat_id, msg_id = message_id, error = %e, "send task failed");
            }
        }

        self.guard
            .commit(chat_id, message_id, &message.raw_text)
            .await;
        self.record(&message, &chat, reply.as_ref()).await;
        Ok(())
    }

    /// Reply target and topic root, fetched in one call and only when a
    /// candidate looks at them. Lookup failures degrade to absence.
    async fn fetch_context(
        &self,
        message: &Message,
        chat: &ChatInfo,
        candidates: &[matcher::Candidate],
    ) -> (Option<Message>, Option<Message>) {
        let reply_id = message
            .quoted_reply_id()
            .filter(|_| matcher::needs_reply(candidates));
        let topic_id = message
            .topic_id()
            .filter(|_| matcher::needs_topic(candidates, chat));

        let ids: Vec<i32> = reply_id.into_iter().chain(topic_id).collect();
        if ids.is_empty() {
            return (None, None);
        }
        let fetched = match self.tg.get_messages(chat.id, &ids).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(chat_id = chat.id, msg_id = message.id, error = %e, "reply/topic lookup failed");
                return (None, None);
            }
        };
        let pick = |id: Option<i32>| id.and_then(|id| fetched.iter().find(|m| m.id == id).cloned());
        (pick(reply_id), pick(topic_id))
    }

    /// Render and format for one route, then spawn its sends.
    async fn dispatch(
        &self,
        sends: &mut JoinSet<()>,
        route: &Route,
        message: &Message,
        chat: &ChatInfo,
        reply: Option<&Message>,
        files: &Arc<Vec<Attachment>>,
    ) {
        let listener = &route.listener;
        let rules = &self.rules[route.index];
        let rendered = render(&message.raw_text, &message.entities, rules);
        let rendered_reply = reply.map(|r| render(&r.raw_text, &r.entities, rules));

        let input = FormatInput {
            listener,
            chat,
            channel: route.channel.as_ref(),
            message,
            rendered: &rendered,
            reply: reply.zip(rendered_reply.as_deref()),
            has_files: !files.is_empty(),
        };
        let payloads = match self.formatter.format(&input) {
            Ok(payloads) => payloads,
            Err(e) => {
                self.report(
                    format!("format {} for {}", message_ref(message), route.label()),
                    &e,
                )
                .await;
                return;
            }
        };

        if !payloads.is_empty() {
            let delivery = Arc::clone(&self.delivery);
            let reporter = self.reporter.clone();
            let url = route.webhook.clone();
            let files = Arc::clone(files);
            let label = route.label();
            let origin = message_ref(message);
            sends.spawn(async move {
                if let Err(e) = delivery.deliver(&url, &payloads, &files).await {
                    warn!(listener = %label, webhook = %redact(&url), error = %e, "send abandoned");
                    if let Some(reporter) = reporter {
                        let report =
                            ErrorReport::from_error(format!("deliver {} to {}", origin, label), &e);
                        reporter.report(report).await;
                    }
                }
            });
        }

        if let Some(destination) = listener.forward_to.clone() {
            let tg = Arc::clone(&self.tg);
            let (chat_id, message_id) = (message.chat_id, message.id);
            sends.spawn(async move {
                if let Err(e) = tg.forward_message(chat_id, message_id, &destination).await {
                    warn!(chat_id, msg_id = message_id, destination = %destination, error = %e, "forward failed");
                }
            });
        }
    }

    /// Pinned messages go to listeners with `pins` scoped to the chat: a
    /// notice first, then each message in order.
    pub async fn process_pins(&self, chat_id: i64, message_ids: &[i32]) -> Result<(), DomainError> {
        let listeners: Vec<(usize, &Arc<Listener>)> = self
            .matcher
            .listeners()
            .iter()
            .enumerate()
            .filter(|(_, l)| l.pins && l.group == Some(chat_id))
            .collect();
        if listeners.is_empty() || message_ids.is_empty() {
            return Ok(());
        }

        let chat = self.tg.get_chat(chat_id).await?;
        let mut messages = Vec::new();
        for message in self.tg.get_messages(chat_id, message_ids).await? {
            let files = self.attachments.collect(&message).await;
            messages.push((message, files));
        }

        for (index, listener) in listeners {
            let label = listener.label(index);
            let Some(url) = pin_destination(listener) else {
                warn!(listener = %label, "pins listener has no destination");
                continue;
            };

            let mut payloads = vec![self.formatter.pin_notice(listener, &chat)];
            let rules = &self.rules[index];
            for (message, files) in &messages {
                let rendered = render(&message.raw_text, &message.entities, rules);
                let input = FormatInput {
                    listener,
                    chat: &chat,
                    channel: None,
                    message,
                    rendered: &rendered,
                    reply: None,
                    has_files: !files.is_empty(),
                };
                match self.formatter.format(&input) {
                    Ok(formatted) => {
                        for outbound in formatted {
                            if outbound.attach_files {
                                // Flush so each message's files travel with it.
                                payloads.push(outbound);
                                self.send_pins(url, &label, &payloads, files).await;
                                payloads.clear();
                            } else {
                                payloads.push(outbound);
                            }
                        }
                    }
                    Err(e) => {
                        self.report(format!("pin {} for {}", message_ref(message), label), &e)
                            .await
                    }
                }
            }
            if !payloads.is_empty() {
                self.send_pins(url, &label, &payloads, &[]).await;
            }
            info!(chat_id, listener = %label, pinned = messages.len(), "pins relayed");
        }
        Ok(())
    }

    async fn send_pins(
        &self,
        url: &str,
        label: &str,
        payloads: &[crate::domain::OutboundPayload],
        files: &[Attachment],
    ) {
        if let Err(e) = self.delivery.deliver(url, payloads, files).await {
            warn!(listener = %label, webhook = %redact(url), error = %e, "pin send abandoned");
        }
    }

    async fn record(&self, message: &Message, chat: &ChatInfo, reply: Option<&Message>) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let entry = MirroredMessage {
            chat_id: message.chat_id,
            message_id: message.id,
            author: message.author.as_ref().map(|a| a.display_name()),
            content: message.raw_text.clone(),
            reply: reply.map(|r| MirroredReply {
                message_id: r.id,
                author: r.author.as_ref().map(|a| a.display_name()),
                content: r.raw_text.clone(),
            }),
            time: message
                .edit_date
                .unwrap_or_else(Utc::now)
                .timestamp_millis(),
            origin: chat.title().to_string(),
        };
        if let Err(e) = mirror.record(entry).await {
            warn!(chat_id = message.chat_id, msg_id = message.id, error = %e, "mirror write failed");
        }
    }
}

fn pin_destination(listener: &Listener) -> Option<&str> {
    listener.webhook.as_deref().or_else(|| {
        listener
            .channels
            .iter()
            .find(|c| c.main)
            .map(|c| c.webhook.as_str())
    })
}

fn message_ref(message: &Message) -> String {
    format!("{}:{}", message.chat_id, message.id)
}

#[async_trait::async_trait]
impl UpdateHandler for RelayService {
    async fn handle(&self, event: InboundEvent) {
        match event {
            InboundEvent::Message {
                chat_id,
                message_id,
                is_edit,
                edit_date,
            } => {
                if let Err(e) = self
                    .process_message(chat_id, message_id, is_edit, edit_date)
                    .await
                {
                    self.report(format!("message {}:{}", chat_id, message_id), &e)
                        .await;
                }
            }
            InboundEvent::Pinned {
                chat_id,
                message_ids,
            } => {
                if let Err(e) = self.process_pins(chat_id, &message_ids).await {
                    self.report(format!("pins in {}", chat_id), &e).await;
                }
            }
        }
    }
}
