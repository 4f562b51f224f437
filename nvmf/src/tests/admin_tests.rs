// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tests for the NVMe admin and I/O paths: the virtualized command subset,
//! passthrough, and the AER slot.

use super::test_helpers::Fixture;
use super::test_helpers::NVME_NQN;
use super::test_helpers::admin_cmd;
use super::test_helpers::backing_completion;
use super::test_helpers::nvme_request;
use crate::connection::Connection;
use crate::session::Session;
use nvmf_spec::AdminOpcode;
use nvmf_spec::Cdw0;
use nvmf_spec::Cdw10GetFeatures;
use nvmf_spec::Cdw10Identify;
use nvmf_spec::Cdw10SetFeatures;
use nvmf_spec::Cns;
use nvmf_spec::Command;
use nvmf_spec::Feature;
use nvmf_spec::NvmOpcode;
use nvmf_spec::Status;
use std::sync::Arc;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

fn identify_cmd(cns: Cns) -> Command {
    let mut cmd = admin_cmd(AdminOpcode::IDENTIFY);
    cmd.cdw10 = Cdw10Identify::new().with_cns(cns.0).into();
    cmd
}

fn get_features_cmd(fid: Feature) -> Command {
    let mut cmd = admin_cmd(AdminOpcode::GET_FEATURES);
    cmd.cdw10 = Cdw10GetFeatures::new().with_fid(fid.0).into();
    cmd
}

fn set_features_cmd(fid: Feature) -> Command {
    let mut cmd = admin_cmd(AdminOpcode::SET_FEATURES);
    cmd.cdw10 = Cdw10SetFeatures::new().with_fid(fid.0).into();
    cmd
}

/// An enabled session with one attached I/O queue.
fn with_io_queue(fixture: &Fixture) -> (Arc<Connection>, Arc<Session>, Arc<Connection>) {
    let (admin, session) = fixture.connect_admin_enabled(NVME_NQN);
    let io = fixture.io_connection();
    let rsp = fixture.connect(&io, NVME_NQN, 1, session.cntlid());
    assert_eq!(rsp.response().status.nvme_status(), Status::SUCCESS);
    (admin, session, io)
}

#[test]
fn identify_controller_serves_the_virtual_data() {
    let fixture = Fixture::new();
    let (conn, session) = fixture.connect_admin_enabled(NVME_NQN);

    let req = nvme_request(&conn, identify_cmd(Cns::CONTROLLER), Some(vec![0; 4096]));
    let rsp = fixture.sync_completion(req);
    assert_eq!(rsp.response().status.nvme_status(), Status::SUCCESS);
    assert_eq!(fixture.backing.pending_count(), 0);

    // Byte-for-byte the session's virtual controller data.
    assert_eq!(rsp.data().unwrap(), session.controller_data().as_bytes());

    let data = session.controller_data();
    assert_eq!(data.cntlid, session.cntlid());
    assert_eq!(data.aerl, 0);
    assert_eq!(data.maxcmd, 128);
    assert_eq!(data.kas, 10);
    // Seeded from the backing controller's identity.
    assert_eq!(data.vid, 0x1234);
    assert_eq!(&data.subnqn[..NVME_NQN.len()], NVME_NQN.as_bytes());
    assert_eq!(data.subnqn[NVME_NQN.len()], 0);
}

#[test]
fn identify_controller_requires_a_full_buffer() {
    let fixture = Fixture::new();
    let (conn, _session) = fixture.connect_admin_enabled(NVME_NQN);

    for data in [None, Some(vec![0u8; 512])] {
        let req = nvme_request(&conn, identify_cmd(Cns::CONTROLLER), data);
        let rsp = fixture.sync_completion(req);
        assert_eq!(
            rsp.response().status.nvme_status(),
            Status::INVALID_FIELD_IN_COMMAND
        );
    }
    assert_eq!(fixture.backing.pending_count(), 0);
}

#[test]
fn identify_with_other_cns_passes_through() {
    let fixture = Fixture::new();
    let (conn, _session) = fixture.connect_admin_enabled(NVME_NQN);

    let mut cmd = identify_cmd(Cns::NAMESPACE);
    cmd.nsid = 1;
    let req = nvme_request(&conn, cmd, Some(vec![0; 4096]));
    fixture.target.execute(req).unwrap();

    // Asynchronous: nothing completed until the backing controller answers.
    assert_eq!(fixture.transport.completed_count(), 0);
    assert_eq!(fixture.backing.pending_count(), 1);
    let submitted = fixture.backing.next_command();
    assert_eq!(submitted.cdw0.opcode(), AdminOpcode::IDENTIFY.0);
    assert_eq!(submitted.nsid, 1);

    fixture.backing.write_next_buffer(b"namespace data");
    fixture.backing.complete_next(backing_completion(0));
    let rsp = fixture.transport.only_completion();
    assert_eq!(rsp.response().status.nvme_status(), Status::SUCCESS);
    assert_eq!(rsp.response().cid, 0x42);
    assert_eq!(rsp.response().sqid, 0);
    assert_eq!(&rsp.data().unwrap()[..14], b"namespace data");
}

#[test]
fn get_features_number_of_queues_is_virtualized() {
    let fixture = Fixture::new();
    let (conn, session) = fixture.connect_admin_enabled(NVME_NQN);

    let req = nvme_request(&conn, get_features_cmd(Feature::NUMBER_OF_QUEUES), None);
    let rsp = fixture.sync_completion(req);
    assert_eq!(rsp.response().status.nvme_status(), Status::SUCCESS);

    let count = u32::from(session.max_connections_allowed() - 1);
    assert_eq!(rsp.response().dw0, (count << 16) | count);
    assert_eq!(fixture.backing.pending_count(), 0);
}

#[test]
fn set_features_number_of_queues_echoes_the_limit() {
    let fixture = Fixture::new();
    let (conn, session) = fixture.connect_admin_enabled(NVME_NQN);
    assert_eq!(session.num_connections(), 1);

    let req = nvme_request(&conn, set_features_cmd(Feature::NUMBER_OF_QUEUES), None);
    let rsp = fixture.sync_completion(req);
    assert_eq!(rsp.response().status.nvme_status(), Status::SUCCESS);

    let count = u32::from(session.max_connections_allowed() - 1);
    assert_eq!(rsp.response().dw0, (count << 16) | count);
}

#[test]
fn set_features_number_of_queues_after_io_queues_is_refused() {
    let fixture = Fixture::new();
    let (admin, session, _io) = with_io_queue(&fixture);
    assert_eq!(session.num_connections(), 2);

    let req = nvme_request(&admin, set_features_cmd(Feature::NUMBER_OF_QUEUES), None);
    let rsp = fixture.sync_completion(req);
    assert_eq!(
        rsp.response().status.nvme_status(),
        Status::COMMAND_SEQUENCE_ERROR
    );
}

#[test]
fn other_features_pass_through() {
    let fixture = Fixture::new();
    let (conn, _session) = fixture.connect_admin_enabled(NVME_NQN);

    let req = nvme_request(&conn, get_features_cmd(Feature::VOLATILE_WRITE_CACHE), None);
    fixture.target.execute(req).unwrap();
    assert_eq!(fixture.backing.pending_count(), 1);

    let req = nvme_request(&conn, set_features_cmd(Feature::KEEP_ALIVE_TIMER), None);
    fixture.target.execute(req).unwrap();
    assert_eq!(fixture.backing.pending_count(), 2);
    assert_eq!(fixture.transport.completed_count(), 0);
}

#[test]
fn a_second_aer_exceeds_the_limit() {
    let fixture = Fixture::new();
    let (conn, _session) = fixture.connect_admin_enabled(NVME_NQN);

    // The first AER parks in the session without completing.
    let req = nvme_request(&conn, admin_cmd(AdminOpcode::ASYNCHRONOUS_EVENT_REQUEST), None);
    fixture.target.execute(req).unwrap();
    assert_eq!(fixture.transport.completed_count(), 0);
    assert_eq!(fixture.backing.pending_count(), 0);

    // The second is refused synchronously.
    let req = nvme_request(&conn, admin_cmd(AdminOpcode::ASYNCHRONOUS_EVENT_REQUEST), None);
    let rsp = fixture.sync_completion(req);
    assert_eq!(
        rsp.response().status.nvme_status(),
        Status::ASYNC_EVENT_REQUEST_LIMIT_EXCEEDED
    );
}

#[test]
fn teardown_aborts_the_pinned_aer() {
    let fixture = Fixture::new();
    let (conn, session) = fixture.connect_admin_enabled(NVME_NQN);

    let req = nvme_request(&conn, admin_cmd(AdminOpcode::ASYNCHRONOUS_EVENT_REQUEST), None);
    fixture.target.execute(req).unwrap();
    assert_eq!(fixture.transport.completed_count(), 0);

    session.teardown();
    let rsp = fixture.transport.only_completion();
    assert_eq!(
        rsp.response().status.nvme_status(),
        Status::ABORTED_SQ_DELETION
    );
    assert_eq!(rsp.response().cid, 0x42);
    assert!(fixture.nvme_subsystem.find_session(session.cntlid()).is_none());
}

#[test]
fn disconnecting_the_last_connection_tears_down() {
    let fixture = Fixture::new();
    let (_admin, session, _io) = with_io_queue(&fixture);

    let req = nvme_request(&_admin, admin_cmd(AdminOpcode::ASYNCHRONOUS_EVENT_REQUEST), None);
    fixture.target.execute(req).unwrap();

    session.disconnect();
    // One connection left; the session and its AER survive.
    assert_eq!(fixture.transport.completed_count(), 0);
    assert!(fixture.nvme_subsystem.find_session(session.cntlid()).is_some());

    session.disconnect();
    let rsp = fixture.transport.only_completion();
    assert_eq!(
        rsp.response().status.nvme_status(),
        Status::ABORTED_SQ_DELETION
    );
    assert!(fixture.nvme_subsystem.find_session(session.cntlid()).is_none());
}

#[test]
fn queue_management_opcodes_are_refused() {
    let fixture = Fixture::new();
    let (conn, _session) = fixture.connect_admin_enabled(NVME_NQN);

    for opcode in [
        AdminOpcode::CREATE_IO_SQ,
        AdminOpcode::CREATE_IO_CQ,
        AdminOpcode::DELETE_IO_SQ,
        AdminOpcode::DELETE_IO_CQ,
    ] {
        let rsp = fixture.sync_completion(nvme_request(&conn, admin_cmd(opcode), None));
        assert_eq!(
            rsp.response().status.nvme_status(),
            Status::INVALID_COMMAND_OPCODE
        );
    }
    // The backing controller is never touched.
    assert_eq!(fixture.backing.pending_count(), 0);
}

#[test]
fn admin_submission_failure_is_an_internal_error() {
    let fixture = Fixture::new();
    let (conn, _session) = fixture.connect_admin_enabled(NVME_NQN);
    fixture.backing.fail_admin_submissions();

    let req = nvme_request(&conn, admin_cmd(AdminOpcode::GET_LOG_PAGE), Some(vec![0; 512]));
    let rsp = fixture.sync_completion(req);
    assert_eq!(
        rsp.response().status.nvme_status(),
        Status::INTERNAL_DEVICE_ERROR
    );
    assert_eq!(fixture.backing.pending_count(), 0);
}

#[test]
fn io_commands_pass_through() {
    let fixture = Fixture::new();
    let (_admin, _session, io) = with_io_queue(&fixture);

    let cmd = Command {
        cdw0: Cdw0::new().with_opcode(NvmOpcode::READ.0).with_cid(0x77),
        nsid: 1,
        ..FromZeros::new_zeroed()
    };
    let req = nvme_request(&io, cmd, Some(vec![0; 4096]));
    fixture.target.execute(req).unwrap();

    assert_eq!(fixture.transport.completed_count(), 0);
    assert_eq!(fixture.backing.pending_count(), 1);
    assert_eq!(
        fixture.backing.next_command().cdw0.opcode(),
        NvmOpcode::READ.0
    );

    fixture.backing.complete_next(backing_completion(0));
    let rsp = fixture.transport.only_completion();
    assert_eq!(rsp.response().status.nvme_status(), Status::SUCCESS);
    assert_eq!(rsp.response().cid, 0x77);
}

#[test]
fn io_submission_failure_is_an_internal_error() {
    let fixture = Fixture::new();
    let (_admin, _session, io) = with_io_queue(&fixture);
    fixture.backing.fail_io_submissions();

    let cmd = Command {
        cdw0: Cdw0::new().with_opcode(NvmOpcode::WRITE.0).with_cid(0x78),
        nsid: 1,
        ..FromZeros::new_zeroed()
    };
    let rsp = fixture.sync_completion(nvme_request(&io, cmd, Some(vec![0; 4096])));
    assert_eq!(
        rsp.response().status.nvme_status(),
        Status::INTERNAL_DEVICE_ERROR
    );
}
