//! Delete requests end to end, plus the bulk context and user-list erasure paths

use super::support::*;
use dataprivacy::context::{Context, ContextDirectory, ContextLevel};
use dataprivacy::privacy::ApprovedUserList;
use dataprivacy::request::ProcessOutcome;
use dataprivacy::{RequestStatus, RequestType};

#[tokio::test]
async fn test_delete_purges_approved_contexts_and_keeps_protected_ones() {
    let fx = fixture();
    let id = fx.approved(RequestType::Delete).await;

    let discovered = fx.pipeline.stores().requests.contexts_for(id).unwrap();
    assert!(discovered.iter().all(|c| c.context != ARCHIVED_COURSE));
    assert_eq!(discovered.len(), 3);

    assert_eq!(fx.drain().await.completed, 1);
    assert_eq!(
        fx.pipeline.stores().requests.require(id).unwrap().status,
        RequestStatus::Complete
    );
    assert!(fx.forum.held(ALICE).is_empty());
    assert_eq!(fx.grades.held(ALICE), vec![ARCHIVED_COURSE]);
    // Other users' data is untouched.
    assert_eq!(fx.grades.held(BOB), vec![COURSE]);
}

#[tokio::test]
async fn test_delete_removes_account_and_notifies_by_email() {
    let fx = fixture();
    let id = fx.approved(RequestType::Delete).await;
    fx.sink.clear();

    let outcome = fx.pipeline.processor().process(id).await.unwrap();
    match outcome {
        ProcessOutcome::Deleted {
            email_only,
            notified,
        } => {
            assert!(email_only);
            assert!(notified.subject_notified);
        }
        other => panic!("expected a delete outcome, got {:?}", other),
    }
    assert!(fx.users.is_deleted(ALICE));

    let sent = fx.sink.sent();
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        Sent::Email { address, message } => {
            assert_eq!(address, "alice@example.org");
            assert_eq!(message.to, ALICE);
            assert_eq!(message.from, Some(DANA));
            assert_eq!(message.reply_to.as_deref(), Some("dpo@example.org"));
            assert_eq!(message.subject, "Data request: Delete all of my personal data");
            assert!(message.context_url.is_none());
            assert!(!message.notification);
            assert!(message.text.contains("Example Campus"));
        }
        other => panic!("expected an email, got {:?}", other),
    }
}

#[tokio::test]
async fn test_delete_without_account_removal_notifies_in_app() {
    let fx = fixture_with(FixtureOptions {
        deactivate: false,
        ..FixtureOptions::default()
    });
    fx.approved(RequestType::Delete).await;
    fx.sink.clear();
    fx.drain().await;

    assert!(!fx.users.is_deleted(ALICE));
    let sent = fx.sink.named("datarequestprocessingresults");
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0], Sent::InApp(_)));
    assert!(sent[0].message().context_url.is_some());
}

#[tokio::test]
async fn test_redelivered_delete_is_a_no_op() {
    let fx = fixture();
    let id = fx.approved(RequestType::Delete).await;
    fx.drain().await;
    let deletions = fx.forum.deleted.lock().len();

    let again = fx.pipeline.processor().process(id).await.unwrap();
    assert!(matches!(
        again,
        ProcessOutcome::Skipped {
            status: RequestStatus::Complete
        }
    ));
    assert_eq!(fx.forum.deleted.lock().len(), deletions);
}

#[tokio::test]
async fn test_delete_all_users_in_context() {
    let fx = fixture();
    let course = fx.contexts.get(COURSE).unwrap();
    fx.pipeline
        .manager()
        .delete_data_for_all_users_in_context(&course)
        .await
        .unwrap();

    assert!(fx.grades.held(BOB).is_empty());
    assert_eq!(fx.grades.held(ALICE), vec![ARCHIVED_COURSE]);
    assert_eq!(fx.forum.held(ALICE), vec![FORUM, ALICE_CONTEXT]);
}

#[tokio::test]
async fn test_user_list_deletion_only_touches_approved_users() {
    let fx = fixture();
    let course = fx.contexts.get(COURSE).unwrap();
    let lists = fx.pipeline.manager().get_users_in_context(&course).await.unwrap();
    assert_eq!(lists.len(), 1);
    let grades = &lists[0];
    assert_eq!(grades.component(), "core_grades");
    assert_eq!(grades.user_ids(), vec![ALICE, BOB]);

    let approved = ApprovedUserList::from_userlist(grades, |user| user == BOB);
    fx.pipeline
        .manager()
        .delete_data_for_users(&approved)
        .await
        .unwrap();

    assert!(fx.grades.held(BOB).is_empty());
    assert!(fx.grades.held(ALICE).contains(&COURSE));
}

#[tokio::test]
async fn test_repeated_delete_for_user_succeeds() {
    let fx = fixture();
    let id = fx.approved(RequestType::Delete).await;
    let approved = fx.pipeline.service().approved_contexts(id).unwrap();

    fx.pipeline.manager().delete_data_for_user(&approved).await.unwrap();
    fx.pipeline.manager().delete_data_for_user(&approved).await.unwrap();

    assert!(fx.forum.held(ALICE).is_empty());
    assert_eq!(fx.grades.held(ALICE), vec![ARCHIVED_COURSE]);
}

#[tokio::test]
async fn test_delete_redelivered_mid_processing_finishes() {
    let fx = fixture();
    let id = fx.approved(RequestType::Delete).await;

    // A first worker got as far as erasing the data, then died.
    fx.pipeline
        .stores()
        .requests
        .transition(id, RequestStatus::Processing)
        .unwrap();
    let approved = fx.pipeline.service().approved_contexts(id).unwrap();
    fx.pipeline.manager().delete_data_for_user(&approved).await.unwrap();

    let outcome = fx.pipeline.processor().process(id).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Deleted { .. }));
    assert_eq!(
        fx.pipeline.stores().requests.require(id).unwrap().status,
        RequestStatus::Complete
    );
    assert!(fx.forum.held(ALICE).is_empty());
    assert!(fx.users.is_deleted(ALICE));
}

#[tokio::test]
async fn test_children_of_protected_contexts_are_kept() {
    let fx = fixture();
    fx.contexts.insert(
        Context::new(COURSE, ContextLevel::Course, 100, Some(SYSTEM), "Biology 101").protected(),
    );
    let id = fx.approved(RequestType::Delete).await;

    let queued: Vec<_> = fx
        .pipeline
        .stores()
        .requests
        .contexts_for(id)
        .unwrap()
        .into_iter()
        .map(|c| (c.component, c.context))
        .collect();
    assert_eq!(queued, vec![("mod_forum".to_string(), ALICE_CONTEXT)]);

    fx.drain().await;
    assert_eq!(fx.forum.held(ALICE), vec![FORUM]);
    assert_eq!(fx.grades.held(ALICE), vec![COURSE, ARCHIVED_COURSE]);
}
