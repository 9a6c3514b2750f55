// tests/realtime/reconnect_tests.rs

#[cfg(test)]
mod tests {
    use crate::fixtures::mock_connector::MockConnector;
    use crate::fixtures::recording_notifier::{Notification, RecordingNotifier};
    use crate::fixtures::FEED_URL;
    use docflow_guard::realtime::{
        ConnectionState, RealtimeConnection, ReconnectPolicy, CONNECTED_MESSAGE, ERROR_DETAILS,
        ERROR_MESSAGE, MAX_ATTEMPTS_MESSAGE,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_test::assert_ok;

    #[tokio::test(start_paused = true)]
    async fn server_close_triggers_exactly_one_reconnect_after_interval() {
        let (connector, mut servers) = MockConnector::new();
        let connection = RealtimeConnection::builder(FEED_URL)
            .connector(connector.clone())
            .spawn()
            .unwrap();

        let first = servers.recv().await.unwrap();
        assert_ok!(connection.wait_for(ConnectionState::Connected).await);

        let closed_at = Instant::now();
        first.close();
        assert_ok!(connection.wait_for(ConnectionState::Disconnected).await);

        let _second = servers.recv().await.unwrap();
        let waited = closed_at.elapsed();
        assert!(waited >= Duration::from_millis(5000), "reconnected after {:?}", waited);
        assert!(waited < Duration::from_millis(5050), "reconnected after {:?}", waited);

        assert_ok!(connection.wait_for(ConnectionState::Connected).await);
        assert_eq!(connection.attempts(), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 2);

        connection.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_notifies_and_reconnects() {
        let (connector, mut servers) = MockConnector::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let connection = RealtimeConnection::builder(FEED_URL)
            .connector(connector.clone())
            .notifier(notifier.clone())
            .spawn()
            .unwrap();

        let first = servers.recv().await.unwrap();
        assert_ok!(connection.wait_for(ConnectionState::Connected).await);

        first.fail("connection reset by peer");
        let _second = servers.recv().await.unwrap();
        assert_ok!(connection.wait_for(ConnectionState::Connected).await);

        assert_eq!(
            notifier.notifications(),
            vec![
                Notification::Success(CONNECTED_MESSAGE.to_string()),
                Notification::Error(ERROR_MESSAGE.to_string(), Some(ERROR_DETAILS.to_string())),
                Notification::Success(CONNECTED_MESSAGE.to_string()),
            ]
        );
        connection.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_handshake_is_retried() {
        let (connector, mut servers) = MockConnector::new();
        connector.fail_next(2);
        let started = Instant::now();

        let connection = RealtimeConnection::builder(FEED_URL)
            .connector(connector.clone())
            .spawn()
            .unwrap();

        let _server = servers.recv().await.unwrap();
        assert_ok!(connection.wait_for(ConnectionState::Connected).await);

        assert_eq!(connector.attempts(), 3);
        assert!(started.elapsed() >= Duration::from_millis(10_000));
        connection.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let (connector, mut servers) = MockConnector::new();
        let connection = RealtimeConnection::builder(FEED_URL)
            .connector(connector.clone())
            .spawn()
            .unwrap();

        let first = servers.recv().await.unwrap();
        assert_ok!(connection.wait_for(ConnectionState::Connected).await);

        // Close from the server side; a retry is now pending
        first.close();
        assert_ok!(connection.wait_for(ConnectionState::Disconnected).await);
        assert_eq!(connection.attempts(), 1);

        connection.disconnect();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(connector.attempts(), 1);
        assert_eq!(connection.status(), ConnectionState::Disconnected);
        assert_eq!(connection.attempts(), 0);

        // An explicit connect works again afterwards
        connection.connect();
        let _server = servers.recv().await.unwrap();
        assert_ok!(connection.wait_for(ConnectionState::Connected).await);

        connection.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_while_connected_does_not_reconnect() {
        let (connector, mut servers) = MockConnector::new();
        let connection = RealtimeConnection::builder(FEED_URL)
            .connector(connector.clone())
            .spawn()
            .unwrap();

        let _server = servers.recv().await.unwrap();
        assert_ok!(connection.wait_for(ConnectionState::Connected).await);

        connection.disconnect();
        assert_ok!(connection.wait_for(ConnectionState::Disconnected).await);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 1);

        connection.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn capped_backoff_gives_up() {
        let (connector, _servers) = MockConnector::new();
        connector.fail_next(usize::MAX);
        let notifier = Arc::new(RecordingNotifier::default());

        let connection = RealtimeConnection::builder(FEED_URL)
            .connector(connector.clone())
            .notifier(notifier.clone())
            .reconnect_policy(ReconnectPolicy::admin_feed())
            .spawn()
            .unwrap();

        // 0.5s + 1s + 2s + 4s + 8s of backoff, then give up
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(connector.attempts(), 6);
        assert_eq!(connection.status(), ConnectionState::Error);
        assert_eq!(
            notifier.notifications().last(),
            Some(&Notification::Error(MAX_ATTEMPTS_MESSAGE.to_string(), None))
        );

        // A manual reconnect starts over
        connection.reconnect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.attempts(), 7);

        connection.shutdown().await;
    }
}
