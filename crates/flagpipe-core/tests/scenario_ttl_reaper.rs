use std::time::{SystemTime, UNIX_EPOCH};

use flagpipe_core::ttl::reap_once;
use flagpipe_schemas::{Flag, FlagStatus, Verdict};

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

fn sample(code: &str) -> Flag {
    Flag {
        flag_code: code.to_string(),
        service_name: "svc".to_string(),
        port_service: 1337,
        team_id: 2,
        submit_time: 1,
        response_time: 0,
        status: FlagStatus::Unsubmitted,
        msg: String::new(),
        username: "u".to_string(),
        exploit_name: "e".to_string(),
    }
}

#[tokio::test]
async fn reaper_removes_flags_whose_response_is_older_than_the_window() {
    let pool = flagpipe_store::connect(":memory:").await.unwrap();
    flagpipe_store::migrate(&pool).await.unwrap();
    flagpipe_store::add_flags(&pool, &[sample("FLAG{old}")]).await.unwrap();

    // Stamp a response_time 3600s in the past, matching scenario 4: tick_time=60,
    // flag_ttl=30 -> window=1800s, well inside the 3600s-old response.
    let stale_response = now_secs().saturating_sub(3600);
    flagpipe_store::update_statuses(
        &pool,
        &[Verdict { flag_code: "FLAG{old}".to_string(), status: "ACCEPTED".to_string(), msg: "ok".to_string() }],
        stale_response,
    )
    .await
    .unwrap();

    let window_secs = 60 * 30;
    let removed = reap_once(&pool, window_secs).await.unwrap();
    assert_eq!(removed, 1);

    let remaining = flagpipe_store::count_filtered(&pool, &Default::default()).await.unwrap();
    assert_eq!(remaining, 0);
}
