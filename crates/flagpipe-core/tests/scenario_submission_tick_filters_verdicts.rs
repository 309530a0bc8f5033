use std::sync::Arc;
use std::time::Duration;

use flagpipe_core::submission::{tick, SubmissionConfig};
use flagpipe_protocol::{MockAdapter, ProtocolAdapter};
use flagpipe_schemas::{Flag, FlagStatus};

fn sample(code: &str, t: u64) -> Flag {
    Flag {
        flag_code: code.to_string(),
        service_name: "svc".to_string(),
        port_service: 1337,
        team_id: 2,
        submit_time: t,
        response_time: 0,
        status: FlagStatus::Unsubmitted,
        msg: String::new(),
        username: "u".to_string(),
        exploit_name: "e".to_string(),
    }
}

#[tokio::test]
async fn happy_path_writes_accepted_verdict() {
    let pool = flagpipe_store::connect(":memory:").await.unwrap();
    flagpipe_store::migrate(&pool).await.unwrap();
    flagpipe_store::add_flags(&pool, &[sample("FLAG{a}", 100)]).await.unwrap();

    let adapter: Arc<dyn ProtocolAdapter> = Arc::new(MockAdapter {
        fixed_status: "ACCEPTED".to_string(),
        fail_unreachable: false,
    });
    let config = SubmissionConfig {
        checker_url: "http://checker".to_string(),
        team_token: "tok".to_string(),
        max_batch_size: 10,
        tick_interval: Duration::from_secs(10),
    };

    tick(&pool, adapter.as_ref(), &config).await.unwrap();

    let rows = flagpipe_store::get_filtered(&pool, &Default::default()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, FlagStatus::Accepted);
    assert_eq!(rows[0].msg, "ok");
    assert!(rows[0].response_time > 0);
}

#[tokio::test]
async fn checker_unreachable_leaves_flags_unsubmitted() {
    let pool = flagpipe_store::connect(":memory:").await.unwrap();
    flagpipe_store::migrate(&pool).await.unwrap();
    let flags: Vec<Flag> = (0..10).map(|i| sample(&format!("FLAG{{{i}}}"), i as u64)).collect();
    flagpipe_store::add_flags(&pool, &flags).await.unwrap();

    let adapter: Arc<dyn ProtocolAdapter> = Arc::new(MockAdapter {
        fixed_status: "ACCEPTED".to_string(),
        fail_unreachable: true,
    });
    let config = SubmissionConfig {
        checker_url: "http://checker".to_string(),
        team_token: "tok".to_string(),
        max_batch_size: 10,
        tick_interval: Duration::from_secs(10),
    };

    tick(&pool, adapter.as_ref(), &config).await.unwrap();

    let rows = flagpipe_store::get_filtered(&pool, &Default::default()).await.unwrap();
    assert_eq!(rows.len(), 10);
    assert!(rows.iter().all(|r| r.status == FlagStatus::Unsubmitted && r.response_time == 0));
}
