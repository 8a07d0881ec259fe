stats! {
    /// An operation frame opened via `begin_op`/the read-only equivalent.
    ops_begun:                Event @ OPS_BEGUN,

    /// An operation frame that reached `end_op`/`end_readonly_op`.
    ops_committed:            Event @ OPS_COMMITTED,

    /// An operation frame that was unwound via `abort_op`.
    ops_aborted:              Event @ OPS_ABORTED,

    /// Number of nested `begin_op` calls observed (depth > 1 transitions).
    ops_nested:               Event @ OPS_NESTED,

    /// A `lin_var` read that had to retry because the epoch advanced out from under it
    /// (`OldSeesNew`).
    old_sees_new_retries:     Event @ OLD_SEES_NEW_RETRIES,

    /// A `check_epoch`/`load_verify` call that raised `EpochVerify`.
    epoch_verify_retries:     Event @ EPOCH_VERIFY_RETRIES,

    /// A software descriptor installed to perform a DCAS.
    sc_desc_installed:        Event @ SC_DESC_INSTALLED,

    /// A DCAS that committed via the descriptor's help-on-observe protocol instead of the
    /// installing thread completing it directly.
    sc_desc_helped:           Event @ SC_DESC_HELPED,

    /// A DCAS attempted on the hardware transactional memory fast path.
    htm_cas_attempted:        Event @ HTM_CAS_ATTEMPTED,

    /// A DCAS that committed via the hardware transactional memory fast path.
    htm_cas_committed:        Event @ HTM_CAS_COMMITTED,

    /// An epoch advance attempted by a thread (blocking or non-blocking advancer).
    advances_attempted:       Event @ ADVANCES_ATTEMPTED,

    /// An epoch advance that actually bumped the global epoch (as opposed to observing a
    /// concurrent advance already in flight).
    advances_succeeded:       Event @ ADVANCES_SUCCEEDED,

    /// Number of reservations a single advance had to wait on before quiescing.
    advance_wait_count:       Size  @ ADVANCE_WAIT_COUNT,

    /// Bytes handed to `pflush` while draining a persist set.
    bytes_flushed:            Size  @ BYTES_FLUSHED,

    /// A PBlk handed to `pretire`/`pdelete`.
    pblks_retired:            Event @ PBLKS_RETIRED,

    /// A PBlk actually freed once no reservation could still observe it.
    pblks_reclaimed:          Event @ PBLKS_RECLAIMED,

    /// A PBlk accepted while replaying the persisted chunk set during recovery.
    recovery_blocks_accepted: Event @ RECOVERY_BLOCKS_ACCEPTED,

    /// A PBlk discarded during recovery (superseded copy or a birth_epoch past `E_durable`).
    recovery_blocks_discarded: Event @ RECOVERY_BLOCKS_DISCARDED,
}
