use sqlx::postgres::PgListener;
use warden_core::log::{EventFilter, EventStream};

use super::Log;
use crate::Error;

impl Log {
    /// Build a live [`EventStream`] backed by a `LISTEN`/`NOTIFY` channel.
    ///
    /// The stream first replays any historical events after `from_position`,
    /// then re-queries after the last delivered position whenever a push is
    /// notified. The listener is attached before the history is read, so a
    /// push in between is picked up by the first notification.
    pub(in crate::log) fn subscribe_with_listener(
        &self,
        filters: Vec<EventFilter>,
        from_position: Option<u64>,
    ) -> EventStream<'_, Error> {
        let log = self.clone();

        Box::pin(async_stream::stream! {
            let mut last_position = from_position;
            let mut listener = match PgListener::connect_with(&log.pool).await {
                Ok(listener) => listener,
                Err(error) => {
                    yield Err(Error::Database(error));
                    return;
                }
            };

            if let Err(error) = listener.listen(Self::EVENTS_NOTIFY_CHANNEL).await {
                yield Err(Error::Database(error));
                return;
            }

            loop {
                match log.load(&filters, last_position).await {
                    Ok(events) => {
                        for event in events {
                            // Skip events already yielded in a previous batch.
                            if last_position.is_some_and(|last| event.position <= last) {
                                continue;
                            }
                            last_position = Some(event.position);
                            yield Ok(event);
                        }
                    }
                    Err(error) => {
                        yield Err(error);
                        return;
                    }
                }

                match listener.recv().await {
                    Ok(notification) => {
                        tracing::trace!(
                            first_position = notification.payload(),
                            "push notification received"
                        );
                    }
                    Err(error) => {
                        yield Err(Error::Database(error));
                        return;
                    }
                }
            }
        })
    }
}
