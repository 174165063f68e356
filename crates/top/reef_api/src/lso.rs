//! The paged listing iterator.

use std::time::{Duration, Instant};

use reef_types::{Bck, LsoMsg, LsoRes};

use crate::client::{ListError, PageClient, lso_page};

/// Progress counter handed to the listing callback.
pub struct LsoCounter {
    start: Instant,
    call_after: Instant,
    count: i64,
    done: bool,
}

impl LsoCounter {
    fn new(call_after: Duration) -> Self {
        let start = Instant::now();
        Self {
            start,
            call_after: start + call_after,
            count: -1,
            done: false,
        }
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn is_finished(&self) -> bool {
        self.done
    }

    fn must_call(&self) -> bool {
        self.call_after == self.start /*immediate*/ || Instant::now() >= self.call_after
    }
}

/// Additional and optional list-objects arguments.
#[derive(Default)]
pub struct ListArgs<'a> {
    /// Invoked after each page once `call_after` has elapsed; the final
    /// invocation sees [`LsoCounter::is_finished`].
    pub callback: Option<&'a mut (dyn FnMut(&LsoCounter) + Send)>,
    pub call_after: Duration,

    /// Max objects to return; 0 lists the whole bucket.
    pub limit: i64,
}

/// List a bucket from the beginning: clears the uuid and continuation
/// token, then pages until done (or until `limit` objects).
pub fn list_objects(
    client: &dyn PageClient,
    bck: &Bck,
    msg: &mut LsoMsg,
    args: ListArgs<'_>,
) -> Result<LsoRes, ListError> {
    msg.uuid.clear();
    msg.continuation_token.clear();
    lso(client, bck, msg, args)
}

/// Fetch a single page, preserving the caller's uuid and continuation
/// token; on success both are updated for the next call.
pub fn list_objects_page(
    client: &dyn PageClient,
    bck: &Bck,
    msg: &mut LsoMsg,
) -> Result<LsoRes, ListError> {
    let mut client = client.clone_with_timeout(client.timeout());
    let page = lso_page(&mut client, bck, msg)?;
    msg.uuid = page.uuid.clone();
    msg.continuation_token = page.continuation_token.clone();
    Ok(page)
}

/// `to_read` holds the remaining number of objects to list (unless
/// listing the entire bucket). Every page reduces it; the final
/// iteration asks for the reduced page.
fn lso(
    client: &dyn PageClient,
    bck: &Bck,
    msg: &mut LsoMsg,
    mut args: ListArgs<'_>,
) -> Result<LsoRes, ListError> {
    let mut client = client.clone_with_timeout(client.timeout());
    let mut counter = args.callback.as_ref().map(|_| LsoCounter::new(args.call_after));

    let list_all = args.limit == 0;
    let mut to_read = args.limit;
    let mut lst: Option<LsoRes> = None;

    while list_all || to_read > 0 {
        if !list_all {
            msg.page_size = to_read;
        }
        let page = lso_page(&mut client, bck, msg)?;
        let page_len = page.entries.len() as i64;
        let token = page.continuation_token.clone();

        match &mut lst {
            None => {
                // page 1 seeds the uuid
                msg.uuid = page.uuid.clone();
                lst = Some(page);
            }
            Some(acc) => {
                if page.uuid != acc.uuid {
                    return Err(ListError::UuidChanged {
                        was: acc.uuid.clone(),
                        got: page.uuid.clone(),
                    });
                }
                acc.entries.extend(page.entries);
                acc.continuation_token = page.continuation_token;
                acc.flags |= page.flags;
            }
        }

        if let (Some(counter), Some(callback)) = (&mut counter, args.callback.as_deref_mut()) {
            if counter.must_call() {
                counter.count = lst.as_ref().map_or(0, |acc| acc.entries.len() as i64);
                if token.is_empty() {
                    counter.done = true;
                }
                callback(counter);
            }
        }

        if token.is_empty() {
            break; // listed all pages
        }
        to_read = (to_read - page_len).max(0);
        msg.continuation_token = token;
    }

    Ok(lst.unwrap_or_default())
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use reef_types::{LsoEnt, Provider};
    use std::sync::Arc;

    /// Server-side page cap, as a real listing endpoint would apply.
    const PAGE_CAP: i64 = 1000;

    struct MockState {
        total: i64,
        /// 1-based attempt numbers that fail with a client timeout.
        timeouts_at: Vec<usize>,
        /// uuid changes from this attempt on (to exercise the invariant).
        uuid_flip_at: Option<usize>,
        attempt: usize,
        timeouts_used: Vec<Duration>,
    }

    struct MockClient {
        state: Arc<Mutex<MockState>>,
        timeout: Duration,
    }

    fn mock(total: i64) -> (Arc<Mutex<MockState>>, MockClient) {
        let state = Arc::new(Mutex::new(MockState {
            total,
            timeouts_at: Vec::new(),
            uuid_flip_at: None,
            attempt: 0,
            timeouts_used: Vec::new(),
        }));
        let client = MockClient {
            state: Arc::clone(&state),
            timeout: Duration::from_millis(100),
        };
        (state, client)
    }

    impl PageClient for MockClient {
        fn fetch_page(&self, _bck: &Bck, msg: &LsoMsg) -> Result<LsoRes, ListError> {
            let mut st = self.state.lock();
            st.attempt += 1;
            st.timeouts_used.push(self.timeout);
            if st.timeouts_at.contains(&st.attempt) {
                return Err(ListError::Timeout("request timed out".to_owned()));
            }
            let uuid = match st.uuid_flip_at {
                Some(at) if st.attempt >= at => "u-flipped".to_owned(),
                _ => "u-1".to_owned(),
            };
            let start: i64 = msg.continuation_token.parse().unwrap_or(0);
            let want = if msg.page_size > 0 {
                msg.page_size.min(PAGE_CAP)
            } else {
                PAGE_CAP
            };
            let end = (start + want).min(st.total);
            let entries = (start..end)
                .map(|i| LsoEnt {
                    name: format!("obj-{i:05}"),
                    ..Default::default()
                })
                .collect();
            let continuation_token = if end < st.total {
                end.to_string()
            } else {
                String::new()
            };
            Ok(LsoRes {
                uuid,
                continuation_token,
                entries,
                flags: if start == 0 { 1 } else { 2 },
            })
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        fn clone_with_timeout(&self, timeout: Duration) -> Box<dyn PageClient> {
            Box::new(MockClient {
                state: Arc::clone(&self.state),
                timeout,
            })
        }
    }

    fn bck() -> Bck {
        Bck::new("bkt", Provider::Reef)
    }

    #[test]
    fn lists_all_pages_with_constant_uuid() {
        let (_state, client) = mock(2234);
        let mut msg = LsoMsg::default();
        let lst = list_objects(&client, &bck(), &mut msg, ListArgs::default()).unwrap();
        assert_eq!(lst.entries.len(), 2234);
        assert_eq!(lst.uuid, "u-1");
        assert!(lst.continuation_token.is_empty());
        assert_eq!(lst.flags, 1 | 2);
        assert_eq!(lst.entries[0].name, "obj-00000");
        assert_eq!(lst.entries[2233].name, "obj-02233");
    }

    #[test]
    fn limit_stops_at_exactly_n() {
        let (_state, client) = mock(2234);
        let mut msg = LsoMsg::default();
        let args = ListArgs {
            limit: 1500,
            ..Default::default()
        };
        let lst = list_objects(&client, &bck(), &mut msg, args).unwrap();
        assert_eq!(lst.entries.len(), 1500);
        // the token of the second page, pointing at the rest
        assert_eq!(lst.continuation_token, "1500");
    }

    #[test]
    fn page2_timeouts_escalate_then_succeed() {
        let (state, client) = mock(2234);
        state.lock().timeouts_at = vec![2, 3];
        let mut msg = LsoMsg::default();
        let lst = list_objects(&client, &bck(), &mut msg, ListArgs::default()).unwrap();
        assert_eq!(lst.entries.len(), 2234);

        let used = state.lock().timeouts_used.clone();
        let ms = |n| Duration::from_millis(n);
        // page 1, then three attempts at page 2 (base, 1.5x, 2.25x), then
        // page 3 at the escalated timeout
        assert_eq!(used[..4], [ms(100), ms(100), ms(150), ms(225)]);
    }

    #[test]
    fn third_timeout_surfaces() {
        let (state, client) = mock(2234);
        state.lock().timeouts_at = vec![1, 2, 3];
        let mut msg = LsoMsg::default();
        let err = list_objects(&client, &bck(), &mut msg, ListArgs::default()).unwrap_err();
        assert!(err.is_client_timeout());
        let st = state.lock();
        assert_eq!(st.attempt, 3);
        assert_eq!(
            st.timeouts_used,
            [
                Duration::from_millis(100),
                Duration::from_millis(150),
                Duration::from_millis(225)
            ]
        );
    }

    #[test]
    fn non_timeout_error_aborts_immediately() {
        struct FailingClient;
        impl PageClient for FailingClient {
            fn fetch_page(&self, _bck: &Bck, _msg: &LsoMsg) -> Result<LsoRes, ListError> {
                Err(ListError::Status {
                    status: 404,
                    msg: "no such bucket".to_owned(),
                })
            }
            fn timeout(&self) -> Duration {
                Duration::from_millis(100)
            }
            fn clone_with_timeout(&self, _timeout: Duration) -> Box<dyn PageClient> {
                Box::new(Self)
            }
        }
        let mut msg = LsoMsg::default();
        let err = list_objects(&FailingClient, &bck(), &mut msg, ListArgs::default()).unwrap_err();
        assert!(matches!(err, ListError::Status { status: 404, .. }));
    }

    #[test]
    fn uuid_change_mid_listing_is_an_error() {
        let (state, client) = mock(2234);
        state.lock().uuid_flip_at = Some(2);
        let mut msg = LsoMsg::default();
        let err = list_objects(&client, &bck(), &mut msg, ListArgs::default()).unwrap_err();
        assert!(matches!(err, ListError::UuidChanged { .. }));
    }

    #[test]
    fn callback_reports_running_count_and_finish() {
        let (_state, client) = mock(2234);
        let mut msg = LsoMsg::default();
        let mut seen: Vec<(i64, bool)> = Vec::new();
        let mut cb = |counter: &LsoCounter| {
            seen.push((counter.count(), counter.is_finished()));
        };
        let args = ListArgs {
            callback: Some(&mut cb),
            call_after: Duration::ZERO,
            limit: 0,
        };
        let lst = list_objects(&client, &bck(), &mut msg, args).unwrap();
        assert_eq!(lst.entries.len(), 2234);
        assert_eq!(seen, [(1000, false), (2000, false), (2234, true)]);
    }

    #[test]
    fn page_by_page_preserves_cursor() {
        let (_state, client) = mock(2234);
        let mut msg = LsoMsg::default();

        let page1 = list_objects_page(&client, &bck(), &mut msg).unwrap();
        assert_eq!(page1.entries.len(), 1000);
        assert_eq!(msg.uuid, "u-1");
        assert_eq!(msg.continuation_token, "1000");

        let page2 = list_objects_page(&client, &bck(), &mut msg).unwrap();
        assert_eq!(page2.entries[0].name, "obj-01000");
        assert_eq!(msg.continuation_token, "2000");
    }
}
