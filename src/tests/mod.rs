mod test_qp_properties;

#[cfg(feature = "allow_filesystem")]
mod test_closed_loop;
