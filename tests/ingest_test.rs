#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;
    use std::collections::VecDeque;
    use std::io::{self, IoSliceMut, Read, Seek, Write};
    use tokio::time::{Duration, Instant};
    use tsinput::config::Config;
    use tsinput::format::ts::{LifecycleState, ReadStatus, TsInput, PID_PAT, TS_PACKET_SIZE};
    use tsinput::netlist::DataPacket;
    use tsinput::source::{FileSource, Source};
    use tsinput::InputError;

    enum Step {
        Data(Vec<u8>),
        PollError(io::ErrorKind),
        ReadError(io::ErrorKind),
    }

    /// Source replaying a script; never ready once the script runs out.
    struct ScriptedSource {
        steps: VecDeque<Step>,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
            }
        }
    }

    #[async_trait]
    impl Source for ScriptedSource {
        async fn readable(&mut self) -> io::Result<()> {
            if matches!(self.steps.front(), Some(Step::PollError(_))) {
                if let Some(Step::PollError(kind)) = self.steps.pop_front() {
                    return Err(kind.into());
                }
            }
            if self.steps.is_empty() {
                futures::future::pending::<()>().await;
            }
            Ok(())
        }

        fn try_read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
            match self.steps.pop_front() {
                None => Err(io::ErrorKind::WouldBlock.into()),
                Some(Step::PollError(kind)) | Some(Step::ReadError(kind)) => Err(kind.into()),
                Some(Step::Data(data)) => {
                    let n = (&data[..]).read_vectored(bufs)?;
                    if n < data.len() {
                        self.steps.push_front(Step::Data(data[n..].to_vec()));
                    }
                    Ok(n)
                }
            }
        }
    }

    /// `count` packets on PID 0x100, the byte after the header holding the index
    fn packets(count: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(count * TS_PACKET_SIZE);
        for i in 0..count {
            let mut packet = vec![0xffu8; TS_PACKET_SIZE];
            packet[..4].copy_from_slice(&[0x47, 0x01, 0x00, 0x10 | (i as u8 & 0x0f)]);
            packet[4] = i as u8;
            data.extend_from_slice(&packet);
        }
        data
    }

    fn small_pool() -> Config {
        Config {
            nb_data: 4,
            read_once: 4,
            ..Config::default()
        }
    }

    fn session(config: Config, steps: Vec<Step>) -> TsInput<ScriptedSource> {
        let mut input = TsInput::new(ScriptedSource::new(steps), config);
        input.init().unwrap();
        input
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_packets_in_a_batch_of_four() {
        let mut input = session(small_pool(), vec![Step::Data(packets(3))]);
        let mut batch = input.new_batch();

        let status = input.read_cycle(&mut batch).await.unwrap();
        assert_eq!(status, ReadStatus::Ok);
        assert_eq!(batch.len(), 3);
        assert!(batch.slots()[..3].iter().all(Option::is_some));
        assert!(batch.slots()[3].is_none());
        assert!(batch.iter().all(|p| p.len() == TS_PACKET_SIZE && p.sync_ok()));
        assert_eq!(input.stats().bad_sync, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_packet_completes_on_next_read() {
        let data = packets(3);
        let mut input = session(
            small_pool(),
            vec![
                Step::Data(data[..2 * TS_PACKET_SIZE + 100].to_vec()),
                Step::Data(data[2 * TS_PACKET_SIZE + 100..].to_vec()),
            ],
        );
        let mut batch = input.new_batch();

        input.read_cycle(&mut batch).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(input.netlist_stats().unwrap().pending_bytes, 100);

        input.read_cycle(&mut batch).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.get(0).unwrap().buffer(), &data[2 * TS_PACKET_SIZE..]);
        assert_eq!(input.netlist_stats().unwrap().pending_bytes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_exhaustion() {
        let mut input = session(
            small_pool(),
            vec![Step::Data(packets(4)), Step::Data(packets(4))],
        );
        let mut batch = input.new_batch();

        input.read_cycle(&mut batch).await.unwrap();
        let held: Vec<DataPacket> = batch.drain().collect();
        assert_eq!(held.len(), 4);

        let result = input.read_cycle(&mut batch).await;
        assert!(matches!(result, Err(InputError::PoolExhausted)));
        assert!(batch.is_empty());

        drop(held);
        input.read_cycle(&mut batch).await.unwrap();
        assert_eq!(batch.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_source_times_out() {
        let mut input = session(Config::default(), Vec::new());
        let mut batch = input.new_batch();

        let start = Instant::now();
        let status = input.read_cycle(&mut batch).await.unwrap();
        assert_eq!(status, ReadStatus::Ok);
        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(500));

        let stats = input.stats();
        assert_eq!(stats.idle_ticks, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(input.netlist_stats().unwrap().free_data, Config::default().nb_data);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_sync_is_forwarded() {
        let mut data = packets(3);
        data[TS_PACKET_SIZE] = 0x00;
        let mut input = session(Config::default(), vec![Step::Data(data)]);
        let mut batch = input.new_batch();

        input.read_cycle(&mut batch).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch.get(0).unwrap().sync_ok());
        assert!(!batch.get(1).unwrap().sync_ok());
        assert!(batch.get(2).unwrap().sync_ok());
        assert_eq!(input.stats().bad_sync, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_order_across_batches() {
        let config = Config {
            nb_data: 16,
            read_once: 4,
            ..Config::default()
        };
        let mut input = session(config, vec![Step::Data(packets(10))]);
        let mut batch = input.new_batch();

        let mut order = Vec::new();
        for expected in [4, 4, 2] {
            input.read_cycle(&mut batch).await.unwrap();
            assert_eq!(batch.len(), expected);
            order.extend(batch.drain().map(|p| p.buffer()[4]));
        }
        assert_eq!(order, (0..10).collect::<Vec<u8>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_and_read_errors() {
        let mut input = session(
            Config::default(),
            vec![
                Step::PollError(io::ErrorKind::Other),
                Step::ReadError(io::ErrorKind::ConnectionReset),
                Step::Data(packets(1)),
            ],
        );
        let mut batch = input.new_batch();

        assert!(matches!(
            input.read_cycle(&mut batch).await,
            Err(InputError::Poll(_))
        ));
        assert!(matches!(
            input.read_cycle(&mut batch).await,
            Err(InputError::Read(_))
        ));
        assert_eq!(input.stats().errors, 2);

        input.read_cycle(&mut batch).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(input.netlist_stats().unwrap().free_data, Config::default().nb_data - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_removes_pat() {
        let mut input = session(Config::default(), Vec::new());
        assert!(input.streams().find_es(PID_PAT).is_some());

        input.end();
        assert_eq!(input.state(), LifecycleState::TornDown);
        assert!(input.streams().find_es(PID_PAT).is_none());
        input.end();

        let mut batch = input.new_batch();
        assert!(matches!(
            input.read_cycle(&mut batch).await,
            Err(InputError::NotReady)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_udp_datagrams_stay_aligned() {
        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = receiver.local_addr().unwrap();
        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // A short datagram must not shift the packets of the next one.
        let mut short = packets(5);
        short.extend_from_slice(&[0x47; 60]);
        sender.send_to(&short, addr).await.unwrap();
        sender.send_to(&packets(7), addr).await.unwrap();

        let mut input = TsInput::new(receiver, Config::default());
        input.init().unwrap();
        let mut batch = input.new_batch();

        input.read_cycle(&mut batch).await.unwrap();
        assert_eq!(batch.len(), 5);
        assert_eq!(input.netlist_stats().unwrap().pending_bytes, 0);

        input.read_cycle(&mut batch).await.unwrap();
        let ids: Vec<(u8, u8)> = batch
            .iter()
            .map(|p| (p.buffer()[0], p.buffer()[4]))
            .collect();
        assert_eq!(ids, (0..7).map(|i| (0x47, i)).collect::<Vec<_>>());
        assert_eq!(input.stats().bad_sync, 0);
    }

    #[quickcheck]
    fn prop_only_whole_packets_are_delivered(count: u8, extra: u8) -> bool {
        let count = (count % 8) as usize;
        let extra = extra as usize % TS_PACKET_SIZE;

        let mut data = packets(count);
        data.extend(std::iter::repeat(0x47).take(extra));
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&data).unwrap();
        file.rewind().unwrap();

        tokio_test::block_on(async {
            let mut input = TsInput::new(FileSource::from(file), Config::default());
            input.init().unwrap();
            let mut batch = input.new_batch();
            input.read_cycle(&mut batch).await.unwrap();

            batch.len() == count.min(Config::default().read_once)
                && batch.iter().all(|p| p.len() == TS_PACKET_SIZE)
                && input.netlist_stats().unwrap().pending_bytes
                    == (count * TS_PACKET_SIZE + extra).min(7 * TS_PACKET_SIZE) % TS_PACKET_SIZE
        })
    }
}
