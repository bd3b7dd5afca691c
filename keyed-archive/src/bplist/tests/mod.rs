mod test_writer;
