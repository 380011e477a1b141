pub mod schedule {
    tonic::include_proto!("schedule");
}
