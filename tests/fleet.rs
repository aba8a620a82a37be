mod helpers;

use fleetd::{ExitCondition, FleetRegistry, Lookup, ServerProcess, ServerState};
use helpers::*;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;

#[test]
fn test_timeout_with_deaf_server_is_killed() {
    let home = tempfile::tempdir().unwrap();
    let mut settings = settings(DEAF);
    settings.tick = SLOW_TICK;
    settings.shutdown_grace_seconds = 1;
    let mut server = ServerProcess::new(context(settings));
    server
        .begin(server_config("deaf", 100, 100, home.path()).with_max_run_seconds(2))
        .unwrap();

    assert!(wait_finished(&server), "monitor never gave up on the server");
    assert!(server.elapsed_seconds() >= 2);
    assert_eq!(server.exit_condition(), Some(ExitCondition::TimeoutKilled));
    assert_eq!(server.end(), ExitCondition::TimeoutKilled);
    assert_eq!(server.state(), ServerState::Exited);

    let tail = server.console_tail();
    assert!(
        tail.iter().any(|l| l.starts_with("got:say ")),
        "warning never reached the server: {tail:?}"
    );
    assert!(
        tail.iter().any(|l| l == "got:stop"),
        "server was killed before it read stop: {tail:?}"
    );
}

#[test]
fn test_single_tick_grace_lets_obedient_server_stop() {
    let home = tempfile::tempdir().unwrap();
    let mut settings = settings(OBEDIENT);
    settings.tick = SLOW_TICK;
    settings.shutdown_grace_seconds = 1;
    let mut server = ServerProcess::new(context(settings));
    server
        .begin(server_config("obedient", 100, 100, home.path()).with_max_run_seconds(2))
        .unwrap();

    assert!(wait_finished(&server));
    assert_eq!(server.end(), ExitCondition::TimeoutRequested);
}

#[test]
fn test_zero_grace_kills_without_waiting() {
    let home = tempfile::tempdir().unwrap();
    let mut settings = settings(DEAF);
    settings.shutdown_grace_seconds = 0;
    let mut server = ServerProcess::new(context(settings));
    server
        .begin(server_config("deaf", 100, 100, home.path()).with_max_run_seconds(2))
        .unwrap();

    assert!(wait_finished(&server));
    assert_eq!(server.end(), ExitCondition::TimeoutKilled);
}

#[test]
fn test_timeout_sends_warning_then_stop_before_killing() {
    let home = tempfile::tempdir().unwrap();
    let mut settings = settings(DEAF);
    settings.shutdown_grace_seconds = 5;
    let mut server = ServerProcess::new(context(settings));
    server
        .begin(server_config("deaf", 100, 100, home.path()).with_max_run_seconds(2))
        .unwrap();

    assert!(wait_finished(&server));
    assert_eq!(server.end(), ExitCondition::TimeoutKilled);

    let tail = server.console_tail();
    let warning = tail.iter().position(|l| l.starts_with("got:say "));
    let stop = tail.iter().position(|l| l == "got:stop");
    assert!(warning.is_some(), "warning never reached the server: {tail:?}");
    assert!(stop.is_some(), "stop never reached the server: {tail:?}");
    assert!(warning < stop);
}

#[test]
fn test_timeout_with_obedient_server_is_requested() {
    let home = tempfile::tempdir().unwrap();
    let mut server = ServerProcess::new(context(settings(OBEDIENT)));
    server
        .begin(server_config("obedient", 100, 100, home.path()).with_max_run_seconds(2))
        .unwrap();

    assert!(wait_finished(&server));
    let condition = server.end();
    assert_eq!(condition, ExitCondition::TimeoutRequested);
    assert!(condition.is_timeout());
}

#[test]
fn test_unsolicited_exit_is_reported() {
    let home = tempfile::tempdir().unwrap();
    let mut server = ServerProcess::new(context(settings(CRASHING)));
    server
        .begin(server_config("crashing", 100, 100, home.path()).with_max_run_seconds(600))
        .unwrap();

    assert!(wait_finished(&server));
    assert_eq!(server.state(), ServerState::Stopping);
    assert_eq!(server.end(), ExitCondition::UnsolicitedExit);
    assert_eq!(server.end(), ExitCondition::NotRunning);
}

#[test]
fn test_two_owners_lookup_and_public_listing() {
    let home = tempfile::tempdir().unwrap();
    let registry = FleetRegistry::with_context(context(settings(OBEDIENT)));
    registry.startup();
    let first = launch(&registry, server_config("alpha", 100, 100, home.path()));
    launch(&registry, server_config("beta", 200, 200, home.path()));

    let handles = match registry.lookup_by_owner(100, None) {
        Lookup::Owned(handles) => handles,
        other => panic!("expected owned servers, got {other:?}"),
    };
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].server().id(), first);
    assert_eq!(handles[0].server().owner().unwrap().uid, 100);
    registry.attach_all(handles);

    let listing = registry.list_snapshot(None, None);
    assert_eq!(listing.len(), 2);
    assert!(listing.iter().all(|s| s.private.is_none()));
    let names: HashSet<_> = listing.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, HashSet::from(["alpha", "beta"]));

    assert_eq!(registry.shutdown().len(), 2);
}

#[test]
fn test_lookup_reports_none_owned() {
    let home = tempfile::tempdir().unwrap();
    let registry = FleetRegistry::with_context(context(settings(OBEDIENT)));
    launch(&registry, server_config("alpha", 100, 100, home.path()));
    assert!(matches!(registry.lookup_by_owner(999, None), Lookup::NoneOwned));
    assert_eq!(registry.occupied(), 1);
    registry.shutdown();
}

#[test]
fn test_housekeeping_collects_finished_servers() {
    let home = tempfile::tempdir().unwrap();
    let registry = FleetRegistry::with_context(context(settings(CRASHING)));
    launch(&registry, server_config("crashing", 100, 100, home.path()));

    let mut finished = Vec::new();
    for _ in 0..500 {
        finished = registry.collect_finished();
        if !finished.is_empty() {
            break;
        }
        thread::sleep(TICK);
    }
    assert_eq!(finished.len(), 1);
    assert_eq!(registry.occupied(), 0);
    assert_eq!(finished[0].server_mut().end(), ExitCondition::UnsolicitedExit);
}

#[test]
fn test_concurrent_clients_never_share_ids_or_owners() {
    let home = tempfile::tempdir().unwrap();
    let ctx = context(settings(OBEDIENT));
    let ids = Arc::clone(&ctx.ids);
    let registry = Arc::new(FleetRegistry::with_context(ctx));
    let live = Arc::new(Mutex::new(HashSet::new()));

    let workers: Vec<_> = (0..4u32)
        .map(|worker| {
            let registry = Arc::clone(&registry);
            let live = Arc::clone(&live);
            let home = home.path().to_path_buf();
            thread::spawn(move || {
                let uid = 1000 + worker;
                for round in 0..3 {
                    let id = launch(
                        &registry,
                        server_config(&format!("w{worker}-{round}"), uid, uid, &home),
                    );
                    assert!(live.lock().unwrap().insert(id), "id {id} reused while alive");

                    let handles = registry.lookup_by_owner(uid, None).into_handles();
                    assert!(!handles.is_empty());
                    for handle in &handles {
                        assert_eq!(handle.server().owner().unwrap().uid, uid);
                    }

                    // end one of ours on odd rounds, put the rest back
                    let mut ended = round % 2 == 0;
                    let mut keep = Vec::new();
                    for mut handle in handles {
                        if !ended {
                            ended = true;
                            let id = handle.server().id();
                            assert_eq!(
                                handle.server_mut().end(),
                                ExitCondition::AuthorityRequested
                            );
                            live.lock().unwrap().remove(&id);
                            drop(handle);
                        } else {
                            keep.push(handle);
                        }
                    }
                    registry.attach_all(keep);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let listed: HashSet<u32> = registry
        .list_snapshot(None, None)
        .iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(listed, *live.lock().unwrap());
    assert_eq!(ids.in_use(), listed.len());

    registry.shutdown();
    assert_eq!(ids.in_use(), 0);
}
