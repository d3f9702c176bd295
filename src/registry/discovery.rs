//! Producer discovery
//!
//! New producers are announced to every other live session; late joiners ask
//! for the producers that already exist. The announcement runs under the same
//! write guard that registered the producer, so a concurrent query either
//! sees the producer or its session is reached by the announcement.

use crate::media::RtpParameters;
use crate::protocol::message::{DataProducerInfo, Notification, ProducerInfo};

use super::error::RegistryError;
use super::ids::{DataProducerId, ProducerId, ResourceKind, SessionId};
use super::store::{ResourceRegistry, Tables};

impl ResourceRegistry {
    /// Announce a producer to every live session except its owner
    ///
    /// Returns the number of sessions reached.
    pub(super) fn broadcast_new_producer_locked(
        &self,
        tables: &Tables,
        origin: SessionId,
        producer_id: ProducerId,
    ) -> usize {
        let Some(producer) = tables.producers.get(&producer_id) else {
            return 0;
        };
        let info = producer.info();

        tables
            .sessions
            .values()
            .filter(|s| s.id != origin)
            .filter(|s| s.notify(Notification::NewProducer(info.clone())))
            .count()
    }

    pub(super) fn broadcast_new_data_producer_locked(
        &self,
        tables: &Tables,
        origin: SessionId,
        data_producer_id: DataProducerId,
    ) -> usize {
        let Some(producer) = tables.data_producers.get(&data_producer_id) else {
            return 0;
        };
        let info = producer.info();

        tables
            .sessions
            .values()
            .filter(|s| s.id != origin)
            .filter(|s| s.notify(Notification::NewDataProducer(info.clone())))
            .count()
    }

    /// Announce an existing producer again to every other session
    ///
    /// Creation already announces once; sessions that consume it already get
    /// `AlreadyConsuming` on a repeated consume.
    pub async fn broadcast_new_producer(
        &self,
        origin: SessionId,
        producer_id: ProducerId,
    ) -> Result<usize, RegistryError> {
        let tables = self.tables.read().await;
        tables.owned_producer(origin, producer_id)?;
        Ok(self.broadcast_new_producer_locked(&tables, origin, producer_id))
    }

    /// Every live producer not owned by `requester`, oldest first
    ///
    /// The requester must already hold a receive transport.
    pub async fn query_existing_producers(
        &self,
        requester: SessionId,
    ) -> Result<Vec<ProducerInfo>, RegistryError> {
        let tables = self.tables.read().await;
        let session = tables.session(requester)?;
        if !tables.has_recv_transport(session) {
            return Err(RegistryError::InvalidState(
                "create a receive transport before querying producers".into(),
            ));
        }

        let mut producers: Vec<_> = tables
            .producers
            .values()
            .filter(|p| p.session_id != requester)
            .filter(|p| tables.session(p.session_id).is_ok())
            .collect();
        producers.sort_by_key(|p| p.created_at);

        let found: Vec<ProducerInfo> = producers.into_iter().map(|p| p.info()).collect();
        tracing::debug!(session_id = %requester, producers = found.len(), "Existing producers queried");
        Ok(found)
    }

    pub async fn query_existing_data_producers(
        &self,
        requester: SessionId,
    ) -> Result<Vec<DataProducerInfo>, RegistryError> {
        let tables = self.tables.read().await;
        let session = tables.session(requester)?;
        if !tables.has_recv_transport(session) {
            return Err(RegistryError::InvalidState(
                "create a receive transport before querying data producers".into(),
            ));
        }

        let mut producers: Vec<_> = tables
            .data_producers
            .values()
            .filter(|p| p.session_id != requester)
            .filter(|p| tables.session(p.session_id).is_ok())
            .collect();
        producers.sort_by_key(|p| p.created_at);

        Ok(producers.into_iter().map(|p| p.info()).collect())
    }

    /// Owner of a producer, if it is still live
    pub async fn producer_owner(&self, producer_id: ProducerId) -> Result<SessionId, RegistryError> {
        self.tables
            .read()
            .await
            .producers
            .get(&producer_id)
            .map(|p| p.session_id)
            .ok_or_else(|| RegistryError::not_found(ResourceKind::Producer, producer_id))
    }

    /// RTP parameters a producer was registered with, ceilings applied
    pub async fn producer_parameters(&self, producer_id: ProducerId) -> Result<RtpParameters, RegistryError> {
        self.tables
            .read()
            .await
            .producers
            .get(&producer_id)
            .map(|p| p.rtp_parameters.clone())
            .ok_or_else(|| RegistryError::not_found(ResourceKind::Producer, producer_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;
    use crate::registry::media::tests::{opus, vp8};
    use crate::registry::store::tests::{registry, session};
    use crate::transport::{Direction, TransportOptions};

    #[tokio::test]
    async fn test_no_self_broadcast() {
        let (registry, _engine) = registry();
        let (alice, mut rx_a) = session(&registry, 1).await;
        let (_bob, mut rx_b) = session(&registry, 2).await;
        let (_carol, mut rx_c) = session(&registry, 3).await;

        let send = registry
            .create_transport(alice, Direction::Send, TransportOptions::media_only())
            .await
            .unwrap();
        let producer = registry
            .create_producer(alice, send.id, MediaKind::Audio, opus(), None)
            .await
            .unwrap();

        assert!(rx_a.try_recv().is_err());
        for rx in [&mut rx_b, &mut rx_c] {
            assert!(matches!(
                rx.try_recv().unwrap(),
                Notification::NewProducer(ProducerInfo { producer_id, .. }) if producer_id == producer
            ));
            // exactly once
            assert!(rx.try_recv().is_err());
        }

        assert_eq!(registry.broadcast_new_producer(alice, producer).await.unwrap(), 2);
        assert_eq!(registry.producer_owner(producer).await.unwrap(), alice);
    }

    #[tokio::test]
    async fn test_query_requires_recv_transport() {
        let (registry, _engine) = registry();
        let (alice, _rx) = session(&registry, 1).await;

        assert!(matches!(
            registry.query_existing_producers(alice).await,
            Err(RegistryError::InvalidState(_))
        ));

        registry
            .create_transport(alice, Direction::Recv, TransportOptions::default())
            .await
            .unwrap();
        assert!(registry.query_existing_producers(alice).await.unwrap().is_empty());
        assert!(registry
            .query_existing_data_producers(alice)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_query_excludes_own_producers() {
        let (registry, _engine) = registry();
        let (alice, _rx_a) = session(&registry, 1).await;
        let (bob, _rx_b) = session(&registry, 2).await;

        let a_send = registry
            .create_transport(alice, Direction::Send, TransportOptions::media_only())
            .await
            .unwrap();
        let b_send = registry
            .create_transport(bob, Direction::Send, TransportOptions::media_only())
            .await
            .unwrap();
        registry
            .create_transport(bob, Direction::Recv, TransportOptions::media_only())
            .await
            .unwrap();

        let first = registry
            .create_producer(alice, a_send.id, MediaKind::Audio, opus(), None)
            .await
            .unwrap();
        let second = registry
            .create_producer(alice, a_send.id, MediaKind::Video, vp8(1), None)
            .await
            .unwrap();
        registry
            .create_producer(bob, b_send.id, MediaKind::Audio, opus(), None)
            .await
            .unwrap();

        let found = registry.query_existing_producers(bob).await.unwrap();
        let ids: Vec<ProducerId> = found.iter().map(|p| p.producer_id).collect();
        assert_eq!(ids, vec![first, second]);
        assert!(found.iter().all(|p| p.session_id == alice));
    }
}
