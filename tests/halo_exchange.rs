//! End-to-end structured halo round trips.

use halo_exchange::exchange::{CommunicationObject, FieldDescriptor, SimpleField};
use halo_exchange::pattern::{
    make_patterns, Coordinate, DomainDescriptor, DomainId, IterationSpace,
    IterationSpacePair,
};
use halo_exchange::setup::ThreadSetupComm;
use halo_exchange::transport::ThreadContext;

fn pair_1d(local: (i64, i64), global: (i64, i64)) -> IterationSpacePair<1> {
    IterationSpacePair::new(
        IterationSpace::new(Coordinate::new([local.0]), Coordinate::new([local.1])),
        IterationSpace::new(Coordinate::new([global.0]), Coordinate::new([global.1])),
    )
}

fn unit_halo_gen(d: &DomainDescriptor<1>) -> Vec<IterationSpacePair<1>> {
    let extent = d.last()[0] - d.first()[0] + 1;
    vec![
        pair_1d((-1, -1), (d.first()[0] - 1, d.first()[0] - 1)),
        pair_1d((extent, extent), (d.last()[0] + 1, d.last()[0] + 1)),
    ]
}

/// Two 1-D subdomains on two ranks, one halo cell per side: after one
/// exchange, the halo cell on each side holds the neighbor's boundary
/// value.
#[test]
fn two_rank_boundary_round_trip() {
    let ctx = ThreadContext::new(2);
    let handles: Vec<_> = (0..2)
        .map(|rank| {
            let comm = ctx.communicator(rank);
            std::thread::spawn(move || {
                let setup = ThreadSetupComm::new(comm.clone());
                let first = 10 * rank as i64;
                let domain = DomainDescriptor::new(
                    DomainId::new(rank as u64),
                    Coordinate::new([first]),
                    Coordinate::new([first + 9]),
                );
                let patterns =
                    make_patterns(&setup, rank, &unit_halo_gen, &[domain]).unwrap();

                // interior initialized with global indices, halo cells poisoned
                let mut raw = [-1.0f64; 12];
                for (i, v) in raw.iter_mut().skip(1).take(10).enumerate() {
                    *v = (first as usize + i) as f64;
                }
                {
                    let mut field = SimpleField::new(
                        DomainId::new(rank as u64),
                        &mut raw,
                        Coordinate::new([1]),
                        Coordinate::new([12]),
                    );
                    let mut co = CommunicationObject::new(&patterns[0], &comm);
                    let handle = co
                        .exchange(vec![&mut field as &mut dyn FieldDescriptor<1>])
                        .unwrap();
                    handle.wait().unwrap();
                }
                raw
            })
        })
        .collect();
    let raws: Vec<[f64; 12]> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // rank 0: right halo holds rank 1's first interior value
    assert_eq!(raws[0][11], 10.0);
    // no neighbor on the left, halo stays poisoned
    assert_eq!(raws[0][0], -1.0);
    // rank 1: left halo holds rank 0's last interior value
    assert_eq!(raws[1][0], 9.0);
    assert_eq!(raws[1][11], -1.0);
    // interiors untouched
    assert_eq!(raws[0][1..11], (0..10).map(f64::from).collect::<Vec<_>>()[..]);
}

/// A single periodic domain exchanging with itself: the halo generator
/// wraps the global coordinates, producing a self-loop plan, and two
/// fields of different element types ride the same exchange.
#[test]
fn periodic_self_exchange_two_fields() {
    let periodic_gen = |d: &DomainDescriptor<1>| {
        let extent = d.last()[0] - d.first()[0] + 1;
        vec![
            // left halo wraps to the far end, right halo to the start
            pair_1d((-1, -1), (d.last()[0], d.last()[0])),
            pair_1d((extent, extent), (d.first()[0], d.first()[0])),
        ]
    };

    let ctx = ThreadContext::new(1);
    let comm = ctx.communicator(0);
    let setup = ThreadSetupComm::new(comm.clone());
    let domain = DomainDescriptor::new(
        DomainId::new(0),
        Coordinate::new([0]),
        Coordinate::new([9]),
    );
    let patterns = make_patterns(&setup, 0, &periodic_gen, &[domain]).unwrap();
    assert_eq!(patterns[0].recv_halos().len(), 1);
    assert_eq!(patterns[0].send_halos().len(), 1);

    let mut temps = [-1.0f64; 12];
    let mut flags = [0u32; 12];
    for i in 0..10 {
        temps[i + 1] = i as f64;
        flags[i + 1] = 100 + i as u32;
    }
    {
        let mut temp_field = SimpleField::new(
            DomainId::new(0),
            &mut temps,
            Coordinate::new([1]),
            Coordinate::new([12]),
        );
        let mut flag_field = SimpleField::new(
            DomainId::new(0),
            &mut flags,
            Coordinate::new([1]),
            Coordinate::new([12]),
        );
        let mut co = CommunicationObject::new(&patterns[0], &comm);
        let handle = co
            .exchange(vec![
                &mut temp_field as &mut dyn FieldDescriptor<1>,
                &mut flag_field as &mut dyn FieldDescriptor<1>,
            ])
            .unwrap();
        handle.wait().unwrap();
    }

    // wrap-around: left halo sees the last cell, right halo the first
    assert_eq!(temps[0], 9.0);
    assert_eq!(temps[11], 0.0);
    assert_eq!(flags[0], 109);
    assert_eq!(flags[11], 100);
}

/// Repeated exchanges reuse the communication object's buffers; values
/// keep following the fields.
#[test]
fn repeated_exchanges_stay_correct() {
    let ctx = ThreadContext::new(2);
    let handles: Vec<_> = (0..2)
        .map(|rank| {
            let comm = ctx.communicator(rank);
            std::thread::spawn(move || {
                let setup = ThreadSetupComm::new(comm.clone());
                let first = 10 * rank as i64;
                let domain = DomainDescriptor::new(
                    DomainId::new(rank as u64),
                    Coordinate::new([first]),
                    Coordinate::new([first + 9]),
                );
                let patterns =
                    make_patterns(&setup, rank, &unit_halo_gen, &[domain]).unwrap();
                let mut raw = [0.0f64; 12];
                let mut co_holder = None;
                for step in 0..3 {
                    for (i, v) in raw.iter_mut().skip(1).take(10).enumerate() {
                        *v = (step * 100 + 10 * rank + i) as f64;
                    }
                    let mut field = SimpleField::new(
                        DomainId::new(rank as u64),
                        &mut raw,
                        Coordinate::new([1]),
                        Coordinate::new([12]),
                    );
                    let co = co_holder
                        .get_or_insert_with(|| CommunicationObject::new(&patterns[0], &comm));
                    let handle = co
                        .exchange(vec![&mut field as &mut dyn FieldDescriptor<1>])
                        .unwrap();
                    handle.wait().unwrap();
                    drop(field);
                    // the received halo cell tracks the step
                    let expected = (step * 100 + 10 * (1 - rank) + if rank == 0 { 0 } else { 9 }) as f64;
                    if rank == 0 {
                        assert_eq!(raw[11], expected);
                    } else {
                        assert_eq!(raw[0], expected);
                    }
                }
                true
            })
        })
        .collect();
    for h in handles {
        assert!(h.join().unwrap());
    }
}
