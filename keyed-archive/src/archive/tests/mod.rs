mod fixtures;
mod test_archiver;
