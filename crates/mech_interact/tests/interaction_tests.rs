//! End-to-end scenarios of the mech interaction rounds.

mod support;

use mech_consensus::{ParticipantSet, PayloadCollector, RoundOutcome};
use mech_interact::dialect::NATIVE_PAYMENT_TYPE;
use mech_interact::{
    AppState, ContentId, Delivery, Dialect, InformationVote, MechInteractApp,
    MechMetadata, MechPayload, RequestVote, ResponseVote, Round, SyncedState, SyncedStateUpdate,
    TerminalState,
};
use serde_json::json;
use std::time::Duration;
use support::*;

fn metadata(nonce: &str) -> MechMetadata {
    MechMetadata {
        prompt: format!("prompt {nonce}"),
        tool: "prediction-online".to_string(),
        nonce: nonce.to_string(),
    }
}

fn v2_deployment(harness: &Harness) {
    let contracts = &harness.contracts;
    contracts.value(addr(MARKETPLACE), "get_max_fee_factor", json!(10_000));
    contracts.value(addr(MECH), "get_max_delivery_rate", json!("1000"));
    contracts.value(addr(MECH), "get_payment_type", json!(NATIVE_PAYMENT_TYPE));
    contracts.with_safe();
}

#[tokio::test]
async fn v2_subscription_goes_to_purchase_round() {
    let harness = Harness::new(marketplace_config());
    v2_deployment(&harness);
    let contracts = &harness.contracts;
    contracts.value(addr(TRACKER), "get_balance", json!("0"));
    contracts.value(addr(TRACKER), "get_subscription_nft", json!(addr(NFT).to_string()));
    contracts.value(addr(TRACKER), "get_subscription_token_id", json!("1"));
    contracts.value(addr(NFT), "get_balance", json!("999"));
    let nvm = harness.config.nvm_config().unwrap();
    contracts.value(nvm.nft_sales_address, "get_agreement_id", json!("0xagreement"));

    let behaviours = harness.behaviours();
    let synced = SyncedState::new().apply(SyncedStateUpdate {
        dialect: Some(Dialect::MarketplaceV2),
        mech_requests: Some(vec![metadata("n1")]),
        ..SyncedStateUpdate::default()
    });

    let payload = behaviours
        .local_payload(Round::MechRequest, &synced)
        .await
        .unwrap();
    assert_eq!(
        payload,
        MechPayload::Request(RequestVote::BuySubscription {
            mech: addr(MECH),
            balance: 999,
            required: 1000,
        })
    );

    let mut app = MechInteractApp::new(harness.config.clone(), Round::MechRequest, synced).unwrap();
    app.process_agreed(payload, 0).unwrap();
    assert_eq!(app.current_round(), Some(Round::MechPurchaseSubscription));

    let purchase = behaviours
        .local_payload(Round::MechPurchaseSubscription, app.synced())
        .await
        .unwrap();
    let MechPayload::PurchaseSubscription(Some(tx)) = &purchase else {
        panic!("expected a purchase transaction, got {purchase:?}");
    };
    assert!(tx.starts_with(&"ab".repeat(32)));

    // native plan: no approval, create and fulfill only
    let methods: Vec<String> = contracts
        .builds()
        .into_iter()
        .map(|(_, method, _)| method)
        .collect();
    assert!(!methods.contains(&"build_approval_tx".to_string()));
    assert!(methods.contains(&"build_create_agreement_and_pay_tx".to_string()));
    assert!(methods.contains(&"build_fulfill_tx".to_string()));

    app.process_agreed(purchase, 0).unwrap();
    assert_eq!(
        app.terminal(),
        Some(TerminalState::FinishedMechPurchaseSubscription)
    );
    assert_eq!(
        app.synced().tx_submitter(),
        Some("MechPurchaseSubscriptionRound")
    );
}

#[tokio::test]
async fn detection_is_cached_and_idempotent() {
    let harness = Harness::new(marketplace_config());
    v2_deployment(&harness);
    let behaviours = harness.behaviours();
    let synced = SyncedState::new();

    let first = behaviours
        .local_payload(Round::MechVersionDetection, &synced)
        .await
        .unwrap();
    let second = behaviours
        .local_payload(Round::MechVersionDetection, &synced)
        .await
        .unwrap();

    assert_eq!(first, MechPayload::VersionDetection(Some(Dialect::MarketplaceV2)));
    assert_eq!(first, second);
    assert_eq!(harness.contracts.reads_of("get_max_fee_factor"), 1);

    behaviours.detector().invalidate();
    let third = behaviours
        .local_payload(Round::MechVersionDetection, &synced)
        .await
        .unwrap();
    assert_eq!(third, first);
    assert_eq!(harness.contracts.reads_of("get_max_fee_factor"), 2);
}

#[tokio::test]
async fn legacy_marketplace_detected_when_v2_reverts() {
    let harness = Harness::new(marketplace_config());
    harness
        .contracts
        .reply(addr(MARKETPLACE), "get_max_fee_factor", Reply::Revert);
    harness.contracts.value(addr(MARKETPLACE), "fee", json!(5));

    let payload = harness
        .behaviours()
        .local_payload(Round::MechVersionDetection, &SyncedState::new())
        .await
        .unwrap();
    assert_eq!(
        payload,
        MechPayload::VersionDetection(Some(Dialect::LegacyMarketplace))
    );

    let mut app = MechInteractApp::new(
        harness.config.clone(),
        Round::MechVersionDetection,
        SyncedState::new(),
    )
    .unwrap();
    app.process_agreed(payload, 0).unwrap();
    assert_eq!(
        app.terminal(),
        Some(TerminalState::FinishedMarketplaceLegacyDetected)
    );
    assert_eq!(app.synced().is_marketplace_v2(), Some(false));
}

#[tokio::test]
async fn all_checks_reverting_means_legacy_direct() {
    let harness = Harness::new(marketplace_config());
    let contracts = &harness.contracts;
    contracts.reply(addr(MARKETPLACE), "get_max_fee_factor", Reply::Revert);
    contracts.reply(addr(MARKETPLACE), "fee", Reply::Revert);
    contracts.reply(addr(MECH), "get_price", Reply::Revert);

    let payload = harness
        .behaviours()
        .local_payload(Round::MechVersionDetection, &SyncedState::new())
        .await
        .unwrap();
    assert_eq!(payload, MechPayload::VersionDetection(Some(Dialect::LegacyDirect)));
}

#[tokio::test]
async fn unreachable_marketplace_fails_detection() {
    let harness = Harness::new(marketplace_config());
    harness
        .contracts
        .reply(addr(MARKETPLACE), "get_max_fee_factor", Reply::Fail);

    let payload = harness
        .behaviours()
        .local_payload(Round::MechVersionDetection, &SyncedState::new())
        .await
        .unwrap();
    assert_eq!(payload, MechPayload::VersionDetection(None));
    // one read per attempt
    assert_eq!(harness.contracts.reads_of("get_max_fee_factor"), 2);

    let mut app = MechInteractApp::new(
        harness.config.clone(),
        Round::MechVersionDetection,
        SyncedState::new(),
    )
    .unwrap();
    app.process_agreed(payload, 0).unwrap();
    assert_eq!(app.terminal(), Some(TerminalState::FailedMechInformation));
    assert!(app
        .synced()
        .last_error()
        .unwrap()
        .starts_with("Dialect detection failed"));
}

#[tokio::test]
async fn failing_v2_check_falls_through_to_legacy_marketplace() {
    let harness = Harness::new(marketplace_config());
    harness
        .contracts
        .reply(addr(MARKETPLACE), "get_max_fee_factor", Reply::Fail);
    harness.contracts.value(addr(MARKETPLACE), "fee", json!(5));

    let payload = harness
        .behaviours()
        .local_payload(Round::MechVersionDetection, &SyncedState::new())
        .await
        .unwrap();
    assert_eq!(
        payload,
        MechPayload::VersionDetection(Some(Dialect::LegacyMarketplace))
    );
}

#[tokio::test]
async fn one_negative_answer_is_enough_for_legacy_direct() {
    let harness = Harness::new(marketplace_config());
    harness
        .contracts
        .reply(addr(MARKETPLACE), "get_max_fee_factor", Reply::Fail);
    harness
        .contracts
        .reply(addr(MARKETPLACE), "fee", Reply::Revert);

    let payload = harness
        .behaviours()
        .local_payload(Round::MechVersionDetection, &SyncedState::new())
        .await
        .unwrap();
    assert_eq!(payload, MechPayload::VersionDetection(Some(Dialect::LegacyDirect)));
}

#[tokio::test]
async fn legacy_deployment_skips_contract_reads() {
    // get_price is left unscripted, so any read of it would fail
    let harness = Harness::new(legacy_config());

    let payload = harness
        .behaviours()
        .local_payload(Round::MechVersionDetection, &SyncedState::new())
        .await
        .unwrap();
    assert_eq!(payload, MechPayload::VersionDetection(Some(Dialect::LegacyDirect)));
    assert_eq!(harness.contracts.reads_of("get_price"), 0);
    assert_eq!(harness.contracts.reads_of("get_max_fee_factor"), 0);
}

#[tokio::test]
async fn request_and_response_round_trip() {
    let mut config = legacy_config();
    config.multisend_batch_size = 1;
    let harness = Harness::new(config);
    harness.contracts.value(addr(MECH), "get_price", json!("10"));
    harness.contracts.with_safe();
    let behaviours = harness.behaviours();

    let synced = SyncedState::new().apply(SyncedStateUpdate {
        dialect: Some(Dialect::LegacyDirect),
        mech_requests: Some(vec![metadata("n1"), metadata("n2")]),
        ..SyncedStateUpdate::default()
    });

    let request = behaviours
        .local_payload(Round::MechRequest, &synced)
        .await
        .unwrap();
    let MechPayload::Request(RequestVote::Prepared {
        price,
        mech,
        requests,
        responses,
        ..
    }) = &request
    else {
        panic!("expected a prepared request, got {request:?}");
    };
    assert_eq!(*price, 10);
    assert_eq!(*mech, addr(MECH));
    assert_eq!(requests, &vec![metadata("n2")]);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].nonce, "n1");

    let uploaded = ContentId::from_digest_hex(&responses[0].data);
    assert_eq!(
        harness.content.fetched(&uploaded),
        Some(serde_json::to_value(metadata("n1")).unwrap())
    );

    let mut app =
        MechInteractApp::new(harness.config.clone(), Round::MechRequest, synced).unwrap();
    app.process_agreed(request, 0).unwrap();
    assert_eq!(app.terminal(), Some(TerminalState::FinishedMechRequest));
    assert_eq!(app.synced().mech_price(), Some(10));
    assert_eq!(app.synced().last_called_mech(), Some(addr(MECH)));
    assert_eq!(app.synced().mech_requests().len(), 1);
    assert_eq!(app.synced().tx_submitter(), Some("MechRequestRound"));
    assert!(app.synced().most_voted_tx_hash().is_some());

    // settlement happens outside; the host records the hash
    let settled = app
        .synced()
        .apply(SyncedStateUpdate::with_final_tx_hash("0xsettled"));
    harness.responses.emit("0xsettled", &["7"]);
    let result = harness
        .content
        .insert_json(&json!({ "requestId": "7", "result": "yes", "prompt": "prompt n1" }));
    harness.responses.deliver(Delivery {
        request_id: "7".to_string(),
        mech: addr(MECH),
        data: result.request_data().unwrap(),
    });

    let response = behaviours
        .local_payload(Round::MechResponse, &settled)
        .await
        .unwrap();
    let mut app = MechInteractApp::new(harness.config.clone(), Round::MechResponse, settled).unwrap();
    app.process_agreed(response, 0).unwrap();

    assert_eq!(app.terminal(), Some(TerminalState::FinishedMechResponse));
    let delivered = &app.synced().mech_responses()[0];
    assert_eq!(delivered.nonce, "n1");
    assert_eq!(delivered.request_id, "7");
    assert_eq!(delivered.result.as_deref(), Some("yes"));
    assert_eq!(delivered.sender_address, Some(addr(MECH)));
}

#[tokio::test]
async fn empty_queue_skips_request() {
    let harness = Harness::new(legacy_config());
    let payload = harness
        .behaviours()
        .local_payload(
            Round::MechRequest,
            &SyncedState::new().apply(SyncedStateUpdate {
                dialect: Some(Dialect::LegacyDirect),
                ..SyncedStateUpdate::default()
            }),
        )
        .await
        .unwrap();
    assert_eq!(payload, MechPayload::Request(RequestVote::Skip));
    assert_eq!(harness.contracts.reads_of("get_price"), 0);
}

fn awaiting_response(config_mech: u8) -> SyncedState {
    SyncedState::new().apply(SyncedStateUpdate {
        dialect: Some(Dialect::MarketplaceV2),
        mech_responses: Some(vec![mech_interact::MechInteractionResponse::pending(
            "n1", "0x01",
        )]),
        last_called_mech: Some(addr(config_mech)),
        final_tx_hash: Some("0xsettled".to_string()),
        ..SyncedStateUpdate::default()
    })
}

#[tokio::test]
async fn missing_response_penalizes_and_reselects() {
    let mut config = marketplace_config();
    config.mech_marketplace_config.use_dynamic_mech_selection = true;
    config.penalize_mech_time_window = 600;
    let harness = Harness::new(config);
    let cheap = listed_mech(&harness.content, 10, 1, &["prediction-online"]);
    let pricey = listed_mech(&harness.content, 11, 5, &["prediction-online"]);
    let harness = harness.with_registry(vec![cheap, pricey]);
    harness.responses.emit("0xsettled", &["1"]);
    let behaviours = harness.behaviours();

    let payload = behaviours
        .local_payload(Round::MechResponse, &awaiting_response(10))
        .await
        .unwrap();
    let MechPayload::Response(ResponseVote::Failed { mech, responses, .. }) = &payload else {
        panic!("expected a failed response, got {payload:?}");
    };
    assert_eq!(*mech, addr(10));
    assert!(responses[0].error.starts_with("Retries were exceeded"));
    assert_eq!(harness.responses.polls(), 2);

    let now = 1_000;
    let mut app = MechInteractApp::new(
        harness.config.clone(),
        Round::MechResponse,
        awaiting_response(10),
    )
    .unwrap();
    app.process_agreed(payload, now).unwrap();
    assert_eq!(app.current_round(), Some(Round::MechInformation));
    assert!(app.synced().penalized_mechs(now).contains(&addr(10)));

    let information = behaviours
        .local_payload(Round::MechInformation, app.synced())
        .await
        .unwrap();
    let MechPayload::Information(Some(InformationVote { priority_mech, .. })) = &information
    else {
        panic!("expected mech information, got {information:?}");
    };
    // the cheaper mech is penalized
    assert_eq!(*priority_mech, addr(11));
    app.process_agreed(information, now).unwrap();
    assert_eq!(app.terminal(), Some(TerminalState::FinishedMechInformation));
    assert_eq!(app.synced().priority_mech_address(), Some(addr(11)));
    // penalized mechs stay listed
    assert_eq!(app.synced().relevant_mechs_info().len(), 2);

    let later = app.synced().apply(SyncedStateUpdate {
        block_timestamp: Some(now + 600),
        ..SyncedStateUpdate::default()
    });
    let after_window = behaviours
        .local_payload(Round::MechInformation, &later)
        .await
        .unwrap();
    let MechPayload::Information(Some(vote)) = after_window else {
        panic!("expected mech information");
    };
    assert_eq!(vote.priority_mech, addr(10));
}

#[tokio::test]
async fn malformed_response_is_rejected() {
    let harness = Harness::new(marketplace_config());
    harness.responses.emit("0xsettled", &["1"]);
    let bad = harness.content.insert_json(&json!({ "answer": "yes" }));
    harness.responses.deliver(Delivery {
        request_id: "1".to_string(),
        mech: addr(MECH),
        data: bad.request_data().unwrap(),
    });

    let payload = harness
        .behaviours()
        .local_payload(Round::MechResponse, &awaiting_response(MECH))
        .await
        .unwrap();
    let MechPayload::Response(ResponseVote::Failed { responses, reason, .. }) = payload else {
        panic!("expected a failed response");
    };
    assert!(reason.contains("unexpected"));
    assert!(reason.contains("missing result"));
    assert_eq!(responses[0].sender_address, Some(addr(MECH)));
    assert!(responses[0].result.is_none());
}

#[tokio::test]
async fn receipt_failures_vote_the_same_reason_everywhere() {
    let mut votes = Vec::new();
    for message in ["connection reset by peer", "rpc node 2 timed out"] {
        let harness = Harness::new(marketplace_config());
        harness.responses.fail_receipts(message);
        votes.push(
            harness
                .behaviours()
                .local_payload(Round::MechResponse, &awaiting_response(MECH))
                .await
                .unwrap(),
        );
    }

    let MechPayload::Response(ResponseVote::Failed { reason, responses, .. }) = &votes[0] else {
        panic!("expected a failed response, got {:?}", votes[0]);
    };
    assert_eq!(
        reason,
        "Retries were exceeded while trying to get the mech's response."
    );
    assert_eq!(responses[0].error, *reason);
    assert_eq!(votes[0], votes[1]);
}

#[tokio::test]
async fn content_store_outage_is_voted_as_retries_exceeded() {
    let harness = Harness::new(marketplace_config());
    harness.responses.emit("0xsettled", &["1"]);
    let result = harness.content.insert_json(&json!({ "result": "yes" }));
    harness.responses.deliver(Delivery {
        request_id: "1".to_string(),
        mech: addr(MECH),
        data: result.request_data().unwrap(),
    });
    harness.content.set_failing(true);

    let payload = harness
        .behaviours()
        .local_payload(Round::MechResponse, &awaiting_response(MECH))
        .await
        .unwrap();
    let MechPayload::Response(ResponseVote::Failed { reason, .. }) = payload else {
        panic!("expected a failed response");
    };
    assert!(reason.starts_with("Retries were exceeded"));
    assert!(!reason.contains("gateway timeout"));
}

#[tokio::test]
async fn out_of_band_delivery_skips_polling() {
    let mut config = marketplace_config();
    config.use_acn_for_delivers = true;
    let harness = Harness::new(config);
    harness.responses.emit("0xsettled", &["1"]);
    let result = harness.content.insert_json(&json!({ "result": { "p_yes": 0.7 } }));

    let inbox = mech_interact::AcnInbox::new();
    inbox.deliver(Delivery {
        request_id: "1".to_string(),
        mech: addr(MECH),
        data: result.request_data().unwrap(),
    });
    let mut collaborators = harness.collaborators();
    collaborators.inbox = Some(inbox.clone());
    let behaviours =
        mech_interact::MechInteractBehaviours::new(harness.config.clone(), collaborators);

    let payload = behaviours
        .local_payload(Round::MechResponse, &awaiting_response(MECH))
        .await
        .unwrap();
    let MechPayload::Response(ResponseVote::Delivered { responses }) = payload else {
        panic!("expected delivered responses");
    };
    assert_eq!(responses[0].result.as_deref(), Some(r#"{"p_yes":0.7}"#));
    assert_eq!(harness.responses.polls(), 0);
    assert!(inbox.is_empty());
}

#[tokio::test]
async fn registry_failure_uses_agreed_cache() {
    let mut config = marketplace_config();
    config.mech_marketplace_config.use_dynamic_mech_selection = true;
    let first = Harness::new(config.clone());
    let cached = vec![listed_mech(&first.content, 10, 1, &["tool"])];
    let second = Harness::new(config);

    for harness in [&first, &second] {
        harness.registry.set_failing(true);
    }
    let synced = SyncedState::new().apply(SyncedStateUpdate {
        mechs_info: Some(cached.clone()),
        ..SyncedStateUpdate::default()
    });

    let a = first
        .behaviours()
        .local_payload(Round::MechInformation, &synced)
        .await
        .unwrap();
    let b = second
        .behaviours()
        .local_payload(Round::MechInformation, &synced)
        .await
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(
        a,
        MechPayload::Information(Some(InformationVote {
            mechs_info: cached,
            priority_mech: addr(10),
        }))
    );
    assert_eq!(first.registry.calls(), 2);

    let participants: ParticipantSet = (20..24).map(addr).collect();
    let members: Vec<_> = participants.iter().copied().collect();
    let mut collector = PayloadCollector::new(0, participants, None).unwrap();
    collector.submit(members[0], a.clone()).unwrap();
    collector.submit(members[1], b).unwrap();
    collector.submit(members[2], a.clone()).unwrap();
    assert_eq!(collector.result(), RoundOutcome::Agreed(a));
}

#[tokio::test]
async fn registry_failure_without_cache_fails_information() {
    let harness = Harness::new(marketplace_config());
    harness.registry.set_failing(true);
    let payload = harness
        .behaviours()
        .local_payload(Round::MechInformation, &SyncedState::new())
        .await
        .unwrap();
    assert_eq!(payload, MechPayload::Information(None));

    let mut app = MechInteractApp::new(
        harness.config.clone(),
        Round::MechVersionDetection,
        SyncedState::new(),
    )
    .unwrap();
    app.process_agreed(MechPayload::VersionDetection(Some(Dialect::MarketplaceV2)), 0)
        .unwrap();
    app.process_agreed(payload, 0).unwrap();
    assert_eq!(app.state(), AppState::Terminal(TerminalState::FailedMechInformation));
}

#[tokio::test]
async fn irrelevant_tools_are_dropped() {
    let mut config = marketplace_config();
    config.irrelevant_tools = ["openai-gpt-3.5-turbo".to_string()].into_iter().collect();
    let harness = Harness::new(config);
    let mech = listed_mech(
        &harness.content,
        10,
        1,
        &["openai-gpt-3.5-turbo", "prediction-online"],
    );
    let only_irrelevant = listed_mech(&harness.content, 11, 1, &["openai-gpt-3.5-turbo"]);
    let harness = harness.with_registry(vec![mech, only_irrelevant]);

    let payload = harness
        .behaviours()
        .local_payload(Round::MechInformation, &SyncedState::new())
        .await
        .unwrap();
    let MechPayload::Information(Some(vote)) = payload else {
        panic!("expected mech information");
    };
    let synced = SyncedState::new().apply(SyncedStateUpdate {
        mechs_info: Some(vote.mechs_info),
        ..SyncedStateUpdate::default()
    });
    assert_eq!(synced.mechs_info().len(), 2);
    assert_eq!(synced.relevant_mechs_info().len(), 1);
    assert_eq!(
        synced.mech_tools().into_iter().collect::<Vec<_>>(),
        vec!["prediction-online".to_string()]
    );
    // static selection ignores the registry
    assert_eq!(vote.priority_mech, addr(MECH));
}

#[test]
fn selection_is_deterministic_across_participants() {
    let content = FakeContentStore::default();
    let mechs = vec![
        listed_mech(&content, 30, 7, &["a"]),
        listed_mech(&content, 31, 7, &["a"]),
        listed_mech(&content, 32, 3, &[]),
    ];
    let mut config = marketplace_config();
    config.mech_marketplace_config.use_dynamic_mech_selection = true;
    let penalized = Default::default();

    let picks: Vec<_> = (0..4)
        .map(|shift| {
            let mut rotated = mechs.clone();
            let len = rotated.len();
            rotated.rotate_left(shift % len);
            mech_interact::select_priority_mech(&config, &rotated, &penalized)
        })
        .collect();
    assert!(picks.iter().all(|pick| *pick == addr(30)));
}

#[tokio::test]
async fn participants_agree_on_penalties_at_the_agreed_block_time() {
    let mut config = marketplace_config();
    config.mech_marketplace_config.use_dynamic_mech_selection = true;
    let harness = Harness::new(config);
    let cheap = listed_mech(&harness.content, 20, 1, &["prediction-online"]);
    let pricey = listed_mech(&harness.content, 21, 5, &["prediction-online"]);
    let harness = harness.with_registry(vec![cheap, pricey]);
    let first = harness.behaviours();
    let second = harness.behaviours();

    let penalized_until = |timestamp: u64| {
        SyncedState::new().apply(SyncedStateUpdate {
            block_timestamp: Some(timestamp),
            penalized_mechs: Some(mech_interact::PenaltyBook::new().with_penalty(
                addr(20),
                1_000,
                Duration::from_secs(600),
            )),
            ..SyncedStateUpdate::default()
        })
    };

    for (timestamp, expected) in [(1_599, addr(21)), (1_600, addr(20))] {
        let synced = penalized_until(timestamp);
        let votes = [
            first.local_payload(Round::MechInformation, &synced).await.unwrap(),
            second.local_payload(Round::MechInformation, &synced).await.unwrap(),
        ];
        for vote in &votes {
            let MechPayload::Information(Some(InformationVote { priority_mech, .. })) = vote else {
                panic!("expected mech information, got {vote:?}");
            };
            assert_eq!(*priority_mech, expected);
        }
        assert_eq!(votes[0], votes[1]);
    }
}
