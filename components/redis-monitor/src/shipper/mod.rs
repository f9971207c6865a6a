pub mod shipper;
