//! Status-code state machine over inbound messages.

use super::Worker;
use crate::bridge::protocol::{Message, Request, StatusCode, tag};
use crate::config::quote::quote;
use crate::diagnostics::Diagnostic;
use crate::method::Capabilities;
use crate::queue::ItemDesc;

impl Worker {
    /// Handle one framed message. Protocol errors are recorded and never stop
    /// the caller's batch.
    pub(super) fn dispatch(&mut self, message: Message) {
        tracing::debug!(
            target: "acquire_worker::wire",
            method = %self.access,
            " <- {}:{}",
            self.access,
            quote(message.raw(), "\n")
        );

        let Some(code) = message.code() else {
            self.diagnostics.push(Diagnostic::InvalidMessage {
                method: self.access.clone(),
                message: message.raw().to_string(),
            });
            return;
        };

        let item = match message.tag(tag::URI) {
            Some(uri) => self
                .queue
                .as_ref()
                .and_then(|queue| queue.borrow().find_item(uri)),
            None => None,
        };

        match code {
            StatusCode::Capabilities => self.on_capabilities(&message),
            StatusCode::Log => {
                tracing::debug!(method = %self.access, "{}", message.tag_or(tag::MESSAGE, ""));
            }
            StatusCode::Status => {
                self.status = message.tag_or(tag::MESSAGE, "").to_string();
            }
            StatusCode::UriStart => match item {
                Some(item) => self.on_uri_start(&message, item),
                None => self.missing_item(code),
            },
            StatusCode::UriDone => match item {
                Some(item) => self.on_uri_done(&message, item),
                None => self.missing_item(code),
            },
            StatusCode::UriFailure => match item {
                Some(item) => self.on_uri_failure(&message, item),
                None => self.missing_item(code),
            },
            StatusCode::GeneralFailure => {
                let text = message
                    .tag(tag::MESSAGE)
                    .unwrap_or_else(|| message.text())
                    .to_string();
                self.diagnostics.push(Diagnostic::GeneralFailure {
                    method: self.access.clone(),
                    message: text,
                });
            }
            StatusCode::MediaChange => self.on_media_change(&message),
            StatusCode::Unknown(other) => {
                tracing::debug!(method = %self.access, code = other, "Ignoring unknown status code");
            }
        }
    }

    fn on_capabilities(&mut self, message: &Message) {
        let caps = Capabilities::from_message(message);
        tracing::debug!(
            method = %self.access,
            version = %caps.version,
            single_instance = caps.single_instance,
            pipeline = caps.pipeline,
            send_config = caps.send_config,
            local_only = caps.local_only,
            "Configured access method"
        );
        if !self.method.negotiate(caps) {
            tracing::debug!(method = %self.access, "Capabilities already negotiated, ignoring");
        }
    }

    fn on_uri_start(&mut self, message: &Message, item: ItemDesc) {
        self.current_size = 0;
        self.total_size = message.tag_u64(tag::SIZE);

        if let Some(owner) = self.resolve_owner(&item) {
            owner.borrow_mut().start(message, self.total_size);
        }
        if let Some(sink) = &self.status_sink {
            sink.borrow_mut().fetch(&item);
        }
        self.current_item = Some(item);
    }

    fn on_uri_done(&mut self, message: &Message, item: ItemDesc) {
        // The queue forgets the owner once its last item goes.
        let owner = self.resolve_owner(&item);
        self.remove_from_queue(&item);

        if let Some(owner) = owner {
            owner.borrow_mut().done(
                message,
                message.tag_u64(tag::SIZE),
                message.tag_or(tag::MD5_HASH, ""),
            );
        }
        self.item_done();

        if let Some(sink) = &self.status_sink {
            let ims_hit = message.tag_bool(tag::IMS_HIT, false)
                || message.tag_bool(tag::ALT_IMS_HIT, false);
            let mut sink = sink.borrow_mut();
            if ims_hit {
                sink.ims_hit(&item);
            } else {
                sink.done(&item);
            }
        }
    }

    fn on_uri_failure(&mut self, message: &Message, item: ItemDesc) {
        let owner = self.resolve_owner(&item);
        self.remove_from_queue(&item);

        if let Some(owner) = owner {
            owner.borrow_mut().failed(message);
        }
        self.item_done();

        if let Some(sink) = &self.status_sink {
            sink.borrow_mut().fail(&item);
        }
    }

    fn on_media_change(&mut self, message: &Message) {
        let confirmed = match &self.status_sink {
            Some(sink) => sink.borrow_mut().media_change(
                message.tag_or(tag::MEDIA, ""),
                message.tag_or(tag::DRIVE, ""),
            ),
            None => false,
        };
        self.enqueue(Request::MediaChanged { failed: !confirmed });
    }

    fn remove_from_queue(&self, item: &ItemDesc) {
        if let Some(queue) = &self.queue {
            queue.borrow_mut().item_done(item);
        }
    }

    fn missing_item(&mut self, code: StatusCode) {
        self.diagnostics.push(Diagnostic::MissingItem {
            method: self.access.clone(),
            code: code.as_u32(),
        });
    }
}
